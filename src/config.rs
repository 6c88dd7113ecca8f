// SPDX-License-Identifier: GPL-3.0-only

//! User configuration stored as JSON in the platform config directory

use crate::constants::{BitratePreset, DEFAULT_BITRATE, DEFAULT_PREVIEW_SIZE};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Folder name used under the config and video directories
const APP_FOLDER: &str = "Dualcast";

/// Config file name inside the config folder
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bitrate used when neither an explicit value nor a preset is given (bits/sec)
    pub default_bitrate: u32,
    /// Optional resolution-tiered bitrate preset
    pub bitrate_preset: Option<BitratePreset>,
    /// Preview target width
    pub preview_width: u32,
    /// Preview target height
    pub preview_height: u32,
    /// Where recordings go when no output path is given
    pub output_dir: Option<PathBuf>,
    /// Capture source description (`test`, `v4l2:/dev/video0`, `pipewire[:target]`)
    pub source: String,
    /// Force a specific GStreamer encoder element
    pub preferred_encoder: Option<String>,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_bitrate: DEFAULT_BITRATE,
            bitrate_preset: None,
            preview_width: DEFAULT_PREVIEW_SIZE.0,
            preview_height: DEFAULT_PREVIEW_SIZE.1,
            output_dir: None,
            source: "test".to_string(),
            preferred_encoder: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/Dualcast/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_FOLDER).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Save to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Bitrate precedence: explicit override, then preset, then `default_bitrate`
    pub fn resolve_bitrate(&self, width: u32, override_bps: Option<u32>) -> u32 {
        override_bps
            .or_else(|| self.bitrate_preset.map(|p| p.bitrate_bps(width)))
            .unwrap_or(self.default_bitrate)
    }

    /// Recording directory (`output_dir` or `<video_dir>/Dualcast`)
    pub fn recordings_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
                .join(APP_FOLDER)
        })
    }
}
