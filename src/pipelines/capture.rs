// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipeline: preview plus optional recording
//!
//! Starting a recording configures the encoder first and then binds its
//! input surface as the record target. Stopping detaches the target, waits
//! for the render worker to acknowledge the detach, and only then ends the
//! encoder session, so no pass ever draws into a released surface.

use crate::constants::timing;
use crate::errors::{RecordingError, RenderError};
use crate::pipelines::render::{RenderEngine, RenderStats, SurfaceBinding};
use crate::pipelines::video::{EncodePipeline, RecordingStatus};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Render engine and encode pipeline driven together
pub struct CapturePipeline {
    engine: RenderEngine,
    binding: SurfaceBinding,
    encode: EncodePipeline,
}

impl CapturePipeline {
    pub fn new(engine: RenderEngine, encode: EncodePipeline) -> Result<Self, RenderError> {
        let binding = engine.binding()?;
        Ok(Self {
            engine,
            binding,
            encode,
        })
    }

    /// Start recording to `path`
    pub fn start_recording(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        bitrate: Option<u32>,
    ) -> Result<(), RecordingError> {
        let surface = self.encode.start_recording(path, width, height, bitrate)?;

        if let Err(e) = self.binding.attach_record_target(Some(surface)) {
            error!(error = %e, "Could not bind encoder surface, abandoning recording");
            self.encode.stop_recording();
            return Err(RecordingError::EncoderConfiguration(e.to_string()));
        }

        info!(path = %path.display(), "Recording started");
        Ok(())
    }

    /// Stop recording and return the finished file, `None` if not recording
    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        if !self.encode.is_recording() {
            return None;
        }

        match self.binding.detach_record_target() {
            Ok(()) => {
                if let Err(e) = self.binding.flush(timing::DETACH_FLUSH_TIMEOUT) {
                    warn!(error = %e, "Record target detach not confirmed");
                }
            }
            Err(e) => warn!(error = %e, "Could not detach record target"),
        }

        self.encode.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.encode.is_recording()
    }

    pub fn frame_count(&self) -> u64 {
        self.encode.frame_count()
    }

    pub fn recording_status(&self) -> RecordingStatus {
        self.encode.status()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.engine.stats()
    }

    /// Stop any recording, then the render worker; idempotent
    pub fn shutdown(&mut self) {
        self.stop_recording();
        self.engine.stop();
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
