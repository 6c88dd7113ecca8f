// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default encoder bitrate when the caller doesn't specify one (bits/sec)
pub const DEFAULT_BITRATE: u32 = 4_000_000;

/// Encoder frame rate (fixed)
pub const FRAME_RATE: u32 = 30;

/// Keyframe interval in seconds (fixed)
pub const KEYFRAME_INTERVAL_SECS: u32 = 1;

/// Default preview target size
pub const DEFAULT_PREVIEW_SIZE: (u32, u32) = (1280, 720);

/// Video encoder bitrate presets
///
/// Resolution-tiered alternative to an explicit bitrate. A preset is picked
/// once at `startRecording`; the encoder runs at that bitrate for the whole
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Smaller files, reduced quality
    Low,
    /// Balanced quality and file size
    #[default]
    Medium,
    /// Larger files, better quality
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Bitrate in bits/sec for a given width
    ///
    /// - SD: 1 / 2 / 4 Mbps
    /// - 720p: 2.5 / 5 / 10 Mbps
    /// - 1080p: 4 / 8 / 16 Mbps
    /// - 1440p: 8 / 16 / 32 Mbps
    /// - 4K: 15 / 30 / 50 Mbps
    pub fn bitrate_bps(&self, width: u32) -> u32 {
        let (low, medium, high) = match ResolutionTier::from_width(width) {
            ResolutionTier::SD => (1_000, 2_000, 4_000),
            ResolutionTier::HD => (2_500, 5_000, 10_000),
            ResolutionTier::FullHD => (4_000, 8_000, 16_000),
            ResolutionTier::TwoK => (8_000, 16_000, 32_000),
            ResolutionTier::FourK => (15_000, 30_000, 50_000),
        };
        let kbps = match self {
            BitratePreset::Low => low,
            BitratePreset::Medium => medium,
            BitratePreset::High => high,
        };
        kbps * 1000
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    SD,
    HD,
    FullHD,
    TwoK,
    FourK,
}

impl ResolutionTier {
    pub fn from_width(width: u32) -> Self {
        match width {
            w if w >= 3840 => ResolutionTier::FourK,
            w if w >= 2560 => ResolutionTier::TwoK,
            w if w >= 1920 => ResolutionTier::FullHD,
            w if w >= 1280 => ResolutionTier::HD,
            _ => ResolutionTier::SD,
        }
    }
}

/// Format bitrate for display (e.g., "4 Mbps" or "2.5 Mbps")
pub fn format_bitrate(bps: u32) -> String {
    let mbps = bps as f64 / 1_000_000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Round a dimension up to the next even value (encoders reject odd sizes)
///
/// `u32::MAX` has no even value above it and rounds down instead.
pub fn round_up_even(value: u32) -> u32 {
    value.checked_add(value & 1).unwrap_or(value & !1)
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Bounded wait for one encoder output poll
    pub const DRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);

    /// How long `stopRecording` waits for the drain loop to see end-of-stream
    pub const STOP_DRAIN_GRACE: Duration = Duration::from_millis(500);

    /// Upper bound for the drain loop to notice a forced stop
    pub const STOP_ABORT_TIMEOUT: Duration = Duration::from_millis(250);

    /// Wait for the render worker to apply a detach before the surface goes away
    pub const DETACH_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

    /// Wait for the muxer to finalize the container after EOS
    pub const MUXER_FINALIZE_TIMEOUT_SECS: u64 = 2;

    /// GStreamer pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// GStreamer pipeline NULL state timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 100;
}

/// Duration of one frame at the fixed encoder frame rate
pub fn frame_duration() -> Duration {
    Duration::from_nanos(1_000_000_000 / FRAME_RATE as u64)
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffers queued on capture appsink (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Pixel format exchanged between capture, render targets and encoder input
    pub const RGBA_FORMAT: &str = "RGBA";

    /// Encoded output caps negotiated in front of the encoder appsink
    pub const H264_AVC_CAPS: &str = "video/x-h264,stream-format=avc,alignment=au";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_even() {
        assert_eq!(round_up_even(1281), 1282);
        assert_eq!(round_up_even(721), 722);
        assert_eq!(round_up_even(1280), 1280);
        assert_eq!(round_up_even(0), 0);
    }

    #[test]
    fn test_round_up_even_at_max() {
        assert_eq!(round_up_even(u32::MAX), u32::MAX - 1);
        assert_eq!(round_up_even(u32::MAX - 1), u32::MAX - 1);
        assert_eq!(round_up_even(u32::MAX - 2), u32::MAX - 1);
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(4_000_000), "4 Mbps");
        assert_eq!(format_bitrate(2_500_000), "2.5 Mbps");
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration().as_millis(), 33);
    }
}
