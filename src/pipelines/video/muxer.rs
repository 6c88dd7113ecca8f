// SPDX-License-Identifier: GPL-3.0-only

//! MP4 muxing of encoded access units
//!
//! ```text
//! appsrc (video/x-h264, avc) ! mp4mux ! filesink
//! ```
//!
//! The output file is opened when the muxer is created, so an unwritable
//! path fails before any frame is encoded.

use super::session::{AccessUnit, Muxer, OutputFormat};
use crate::constants::timing;
use crate::errors::RecordingError;
use crate::media::encoders::video::MP4_MUXER;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

fn muxer_error(context: &str, e: impl std::fmt::Display) -> RecordingError {
    RecordingError::MuxerConfiguration(format!("{}: {}", context, e))
}

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

/// Single video track MP4 writer
pub struct GstMuxer {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    path: PathBuf,
    track_caps: Option<gst::Caps>,
    started: bool,
    finalized: bool,
    released: bool,
}

impl GstMuxer {
    /// Build the muxing pipeline and open `path` for writing
    pub fn create(path: &Path) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| muxer_error("GStreamer init", e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| muxer_error(&format!("Creating {}", parent.display()), e))?;
        }

        info!(path = %path.display(), "Creating muxer");

        let appsrc = AppSrc::builder()
            .format(gst::Format::Time)
            .is_live(false)
            .build();

        let muxer = gst::ElementFactory::make(MP4_MUXER)
            .build()
            .map_err(|e| muxer_error(MP4_MUXER, e))?;
        // Seekable output: duration and index written on finalize
        if muxer.has_property("streamable") {
            muxer.set_property("streamable", false);
        }

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| muxer_error("filesink", e))?;

        let pipeline = gst::Pipeline::with_name("dualcast-muxer");
        let elements = [appsrc.upcast_ref::<gst::Element>(), &muxer, &filesink];
        pipeline
            .add_many(elements)
            .map_err(|e| muxer_error("Adding elements", e))?;
        gst::Element::link_many(elements).map_err(|e| muxer_error("Linking elements", e))?;

        // filesink opens its location on the way to PAUSED
        if let Err(e) = pipeline.set_state(gst::State::Paused) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(muxer_error(&format!("Opening {}", path.display()), e));
        }

        Ok(Self {
            pipeline,
            appsrc,
            path: path.to_path_buf(),
            track_caps: None,
            started: false,
            finalized: false,
            released: false,
        })
    }
}

/// Caps describing an avcC H.264 track
fn track_caps(format: &OutputFormat) -> gst::Caps {
    let mut builder = gst::Caps::builder("video/x-h264")
        .field("stream-format", "avc")
        .field("alignment", "au")
        .field("width", format.width as i32)
        .field("height", format.height as i32)
        .field("framerate", gst::Fraction::new(format.frame_rate as i32, 1));
    if let Some(codec_data) = &format.codec_data {
        builder = builder.field("codec_data", gst::Buffer::from_slice(codec_data.clone()));
    }
    builder.build()
}

impl Muxer for GstMuxer {
    fn add_track(&mut self, format: &OutputFormat) -> Result<usize, RecordingError> {
        if self.track_caps.is_some() {
            return Err(RecordingError::Muxer("Video track already added".into()));
        }
        let caps = track_caps(format);
        debug!(caps = %caps, "Adding video track");
        self.track_caps = Some(caps);
        Ok(0)
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        let Some(caps) = &self.track_caps else {
            return Err(RecordingError::Muxer("Muxer started without a track".into()));
        };
        self.appsrc.set_caps(Some(caps));
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::Muxer(format!("Failed to start muxer: {}", e)))?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, unit: &AccessUnit) -> Result<(), RecordingError> {
        if track != 0 || !self.started {
            return Err(RecordingError::Muxer(format!(
                "Sample for track {} on a muxer that is not running",
                track
            )));
        }

        let mut buffer = gst::Buffer::from_slice(unit.payload().to_vec());
        if let Some(buffer) = buffer.get_mut() {
            let pts = clock_time(unit.pts);
            buffer.set_pts(pts);
            buffer.set_dts(pts);
            if !unit.is_key_frame() {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RecordingError::Muxer(format!("Push failed: {:?}", e)))
    }

    fn stop(&mut self) -> Result<(), RecordingError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        debug!(path = %self.path.display(), "Finalizing container");
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!(error = ?e, "Failed to send EOS to muxer");
        }

        let mut result = Ok(());
        if let Some(bus) = self.pipeline.bus() {
            match bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(timing::MUXER_FINALIZE_TIMEOUT_SECS),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        info!(path = %self.path.display(), "Container finalized");
                    }
                    gst::MessageView::Error(err) => {
                        result = Err(RecordingError::Muxer(err.error().to_string()));
                    }
                    _ => {}
                },
                None => warn!(
                    timeout_secs = timing::MUXER_FINALIZE_TIMEOUT_SECS,
                    "Timed out waiting for muxer EOS, file may be incomplete"
                ),
            }
        }

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop muxer pipeline");
        }
        result
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to release muxer pipeline");
        }
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_caps_carry_codec_data() {
        let _ = gst::init();
        let format = OutputFormat {
            mime: "video/avc".to_string(),
            width: 1282,
            height: 722,
            frame_rate: 30,
            codec_data: Some(vec![1, 0x64, 0, 0x1f]),
        };
        let caps = track_caps(&format);
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<i32>("width").unwrap(), 1282);
        assert_eq!(s.get::<&str>("stream-format").unwrap(), "avc");
        assert!(s.has_field("codec_data"));
    }

    #[test]
    fn test_second_track_rejected() {
        if gst::init().is_err() || gst::ElementFactory::find(MP4_MUXER).is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = GstMuxer::create(&dir.path().join("clip.mp4")).unwrap();
        let format = OutputFormat {
            mime: "video/avc".to_string(),
            width: 64,
            height: 64,
            frame_rate: 30,
            codec_data: None,
        };
        assert_eq!(muxer.add_track(&format).unwrap(), 0);
        assert!(muxer.add_track(&format).is_err());
        muxer.release();
    }

    #[test]
    fn test_write_before_start_fails() {
        if gst::init().is_err() || gst::ElementFactory::find(MP4_MUXER).is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = GstMuxer::create(&dir.path().join("nested/clip.mp4")).unwrap();
        assert!(dir.path().join("nested").is_dir());

        let unit = AccessUnit {
            index: 1,
            data: vec![0; 8],
            offset: 0,
            size: 8,
            pts: Duration::ZERO,
            flags: super::super::session::BufferFlags::KEY_FRAME,
        };
        assert!(muxer.write_sample(0, &unit).is_err());
    }
}
