// SPDX-License-Identifier: GPL-3.0-only

//! Encode pipeline: recording state machine and drain loop
//!
//! ```text
//! Idle -> Configuring -> Encoding -> Draining -> Stopped -> Idle
//! ```
//!
//! `start_recording` configures the encoder and muxer on a dedicated encode
//! worker and hands back the encoder's input surface. The worker then polls
//! the encoder with a short bounded wait, starts the muxer when the output
//! format is known and writes every access unit in drain order.
//! `stop_recording` signals end of input, gives the loop a short grace period
//! to drain, and tears the session down.
//!
//! The encoder and muxer are only ever touched by the encode worker. The one
//! value shared with other threads is the atomic recording state.

use super::session::{
    AccessUnit, EncoderBackend, EncoderInput, EncoderOutput, EncoderSettings, Muxer,
    OutputFormat, VideoEncoder,
};
use crate::backends::surface::{RenderedImage, Surface, SurfaceHandle};
use crate::constants::{DEFAULT_BITRATE, round_up_even, timing};
use crate::errors::{RecordingError, SurfaceError};
use crate::pipelines::worker::{LoopAction, LoopController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Recording lifecycle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle = 0,
    Configuring = 1,
    Encoding = 2,
    Draining = 3,
    Stopped = 4,
}

impl RecordingState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RecordingState::Configuring,
            2 => RecordingState::Encoding,
            3 => RecordingState::Draining,
            4 => RecordingState::Stopped,
            _ => RecordingState::Idle,
        }
    }

    /// Encoding or draining
    pub fn is_recording(self) -> bool {
        matches!(self, RecordingState::Encoding | RecordingState::Draining)
    }
}

/// Values readable from any thread
#[derive(Default)]
struct SharedStatus {
    state: AtomicU8,
    frame_count: AtomicU64,
}

impl SharedStatus {
    fn state(&self) -> RecordingState {
        RecordingState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RecordingState) {
        let previous = RecordingState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            debug!(from = ?previous, to = ?state, "Recording state");
        }
    }
}

/// Cloneable read-only view of the recording status
#[derive(Clone)]
pub struct RecordingStatus {
    shared: Arc<SharedStatus>,
}

impl RecordingStatus {
    pub fn state(&self) -> RecordingState {
        self.shared.state()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state().is_recording()
    }

    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }
}

/// Encoder input surface that counts frames submitted while encoding
struct CountingSurface {
    inner: SurfaceHandle,
    shared: Arc<SharedStatus>,
}

impl Surface for CountingSurface {
    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn present(&self, image: &RenderedImage) -> Result<(), SurfaceError> {
        self.inner.present(image)?;
        if self.shared.state() == RecordingState::Encoding {
            let count = self.shared.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % timing::FRAME_LOG_INTERVAL == 0 {
                debug!(frames = count, "Frames submitted to encoder");
            }
        }
        Ok(())
    }

    fn label(&self) -> &str {
        self.inner.label()
    }
}

/// Encoder, muxer and negotiation state; lives on the encode worker
struct EncoderSession {
    encoder: Box<dyn VideoEncoder>,
    muxer: Box<dyn Muxer>,
    shared: Arc<SharedStatus>,
    track: Option<usize>,
    muxer_started: bool,
    last_pts: Option<Duration>,
    written: u64,
    released: bool,
}

impl EncoderSession {
    /// One bounded poll of the encoder
    fn drain_step(&mut self) -> LoopAction {
        let output = match self.encoder.dequeue_output(timing::DRAIN_POLL_TIMEOUT) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Encoder drain failed, ending drain loop");
                return LoopAction::Stop;
            }
        };

        match output {
            EncoderOutput::FormatChanged(format) => {
                if self.muxer_started {
                    warn!(?format, "Ignoring repeated format change");
                    return LoopAction::Continue;
                }
                match self.start_muxer(&format) {
                    Ok(track) => {
                        info!(
                            track,
                            mime = %format.mime,
                            width = format.width,
                            height = format.height,
                            "Muxer started"
                        );
                        LoopAction::Continue
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to start muxer, ending drain loop");
                        LoopAction::Stop
                    }
                }
            }

            EncoderOutput::Buffer(unit) => {
                let result = self.write_unit(&unit);
                self.encoder.release_output(unit.index);
                if let Err(e) = result {
                    error!(error = %e, "Failed to write access unit, ending drain loop");
                    return LoopAction::Stop;
                }

                if unit.is_end_of_stream() {
                    if self.muxer_started {
                        info!(written = self.written, "End of stream reached");
                        return LoopAction::Stop;
                    }
                    // Never leave before the format is known
                    warn!("End of stream before output format, still waiting");
                }
                LoopAction::Continue
            }

            EncoderOutput::TryAgainLater => match self.shared.state() {
                RecordingState::Encoding => LoopAction::Continue,
                RecordingState::Draining if !self.muxer_started => LoopAction::Continue,
                RecordingState::Draining => {
                    debug!("Encoder idle while draining, ending drain loop");
                    LoopAction::Stop
                }
                _ => LoopAction::Stop,
            },
        }
    }

    fn start_muxer(&mut self, format: &OutputFormat) -> Result<usize, RecordingError> {
        let track = self.muxer.add_track(format)?;
        self.muxer.start()?;
        self.track = Some(track);
        self.muxer_started = true;
        Ok(track)
    }

    fn write_unit(&mut self, unit: &AccessUnit) -> Result<(), RecordingError> {
        let Some(track) = self.track.filter(|_| self.muxer_started) else {
            if unit.size > 0 {
                debug!(pts = ?unit.pts, "Dropping access unit before output format");
            }
            return Ok(());
        };

        // Codec configuration travels in the track format
        if unit.is_codec_config() || unit.size == 0 || unit.payload().is_empty() {
            return Ok(());
        }

        let pts = match self.last_pts {
            Some(last) if unit.pts < last => {
                warn!(pts = ?unit.pts, last = ?last, "Non-monotonic timestamp, clamping");
                last
            }
            _ => unit.pts,
        };

        if pts == unit.pts {
            self.muxer.write_sample(track, unit)?;
        } else {
            let mut clamped = unit.clone();
            clamped.pts = pts;
            self.muxer.write_sample(track, &clamped)?;
        }

        self.last_pts = Some(pts);
        self.written += 1;
        if self.written % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(written = self.written, pts = ?pts, "Access units written");
        }
        Ok(())
    }

    /// Idempotent: muxer finalized only if it was started
    fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.muxer_started {
            if let Err(e) = self.muxer.stop() {
                warn!(error = %e, "Failed to finalize container");
            }
        }
        self.muxer.release();
        self.encoder.release();
        info!(written = self.written, "Encoder session released");
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The active recording as seen from the controlling thread
struct ActiveRecording {
    controller: LoopController,
    input: Arc<dyn EncoderInput>,
    path: PathBuf,
    settings: EncoderSettings,
}

/// Recording front end: one session at a time
pub struct EncodePipeline {
    backend: Arc<dyn EncoderBackend>,
    shared: Arc<SharedStatus>,
    active: Option<ActiveRecording>,
    preferred_encoder: Option<String>,
}

impl EncodePipeline {
    pub fn new(backend: Arc<dyn EncoderBackend>) -> Self {
        Self {
            backend,
            shared: Arc::new(SharedStatus::default()),
            active: None,
            preferred_encoder: None,
        }
    }

    /// Request a specific encoder element for later sessions
    pub fn with_preferred_encoder(mut self, encoder: Option<String>) -> Self {
        self.preferred_encoder = encoder;
        self
    }

    /// Start a session and return the surface to draw frames into
    ///
    /// Width and height are rounded up to even values; `bitrate` defaults to
    /// 4 Mbit/s. On failure everything created so far is released and the
    /// pipeline is back to `Idle`.
    pub fn start_recording(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        bitrate: Option<u32>,
    ) -> Result<SurfaceHandle, RecordingError> {
        if self.active.is_some() || self.shared.state() != RecordingState::Idle {
            warn!("Recording already in progress");
            return Err(RecordingError::AlreadyRecording);
        }

        let mut settings = EncoderSettings::new(
            round_up_even(width),
            round_up_even(height),
            bitrate.unwrap_or(DEFAULT_BITRATE),
        );
        settings.preferred_encoder = self.preferred_encoder.clone();

        info!(
            path = %path.display(),
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate_bps,
            "Starting recording"
        );

        self.shared.set_state(RecordingState::Configuring);
        self.shared.frame_count.store(0, Ordering::Relaxed);

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        let worker_settings = settings.clone();
        let worker_path = path.to_path_buf();

        let started = LoopController::start_with_init(
            "encode-worker",
            move || {
                let configured = backend.configure_encoder(&worker_settings)?;
                let muxer = match backend.create_muxer(&worker_path) {
                    Ok(muxer) => muxer,
                    Err(e) => {
                        let mut encoder = configured.encoder;
                        configured.input.release();
                        encoder.release();
                        return Err(e);
                    }
                };

                shared.set_state(RecordingState::Encoding);
                let session = EncoderSession {
                    encoder: configured.encoder,
                    muxer,
                    shared,
                    track: None,
                    muxer_started: false,
                    last_pts: None,
                    written: 0,
                    released: false,
                };
                Ok((session, configured.input))
            },
            |session: &mut EncoderSession| session.drain_step(),
        );

        let (controller, input) = match started {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "Failed to start recording");
                self.shared.set_state(RecordingState::Idle);
                return Err(e);
            }
        };

        let surface: SurfaceHandle = Arc::new(CountingSurface {
            inner: input.surface(),
            shared: Arc::clone(&self.shared),
        });

        self.active = Some(ActiveRecording {
            controller,
            input,
            path: path.to_path_buf(),
            settings,
        });

        Ok(surface)
    }

    /// Finish the session and return the recorded file path
    ///
    /// Returns `None` when no session is active.
    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        let Some(mut active) = self.active.take() else {
            debug!("Stop requested while idle");
            return None;
        };

        info!(path = %active.path.display(), "Stopping recording");

        // End of input is queued before the loop may see Draining
        if let Err(e) = active.input.signal_end_of_input() {
            warn!(error = %e, "Failed to signal end of input");
        }
        self.shared.set_state(RecordingState::Draining);

        if !active.controller.wait_finished(timing::STOP_DRAIN_GRACE) {
            warn!(
                grace = ?timing::STOP_DRAIN_GRACE,
                "Drain loop still running after grace period, forcing stop"
            );
            self.shared.set_state(RecordingState::Stopped);
            active.controller.request_stop();
            if !active.controller.wait_finished(timing::STOP_ABORT_TIMEOUT) {
                warn!("Drain loop slow to observe stop");
            }
        }

        // Waits for the worker to finalize the container
        active.controller.join();
        active.input.release();

        self.shared.set_state(RecordingState::Stopped);
        self.shared.set_state(RecordingState::Idle);

        info!(
            path = %active.path.display(),
            frames = self.frame_count(),
            width = active.settings.width,
            height = active.settings.height,
            "Recording stopped"
        );
        Some(active.path)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state().is_recording()
    }

    pub fn state(&self) -> RecordingState {
        self.shared.state()
    }

    /// Frames submitted to the encoder input in the current or last session
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop_recording();
        }
    }
}
