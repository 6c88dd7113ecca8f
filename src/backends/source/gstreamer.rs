// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture source feeding a [`FrameSlot`]

use super::{Frame, FrameSignal, FrameSlot, FrameSource, VERTICAL_FLIP_TRANSFORM};
use crate::constants::{pipeline, timing};
use crate::errors::RenderError;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which capture element to put at the head of the pipeline
///
/// The device itself is chosen by the caller; no discovery happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `videotestsrc` pattern
    TestPattern,
    /// `v4l2src` on a device node
    V4l2(String),
    /// `pipewiresrc`, optionally bound to a target object
    PipeWire(Option<String>),
}

impl SourceSpec {
    fn element_description(&self) -> String {
        match self {
            SourceSpec::TestPattern => "videotestsrc is-live=true pattern=ball".to_string(),
            SourceSpec::V4l2(device) => format!("v4l2src device={}", device),
            SourceSpec::PipeWire(Some(target)) => {
                format!("pipewiresrc target-object={}", target)
            }
            SourceSpec::PipeWire(None) => "pipewiresrc".to_string(),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        match (kind, arg) {
            ("test", None) => Ok(SourceSpec::TestPattern),
            ("v4l2", Some(path)) if !path.is_empty() => Ok(SourceSpec::V4l2(path.to_string())),
            ("pipewire", None) => Ok(SourceSpec::PipeWire(None)),
            ("pipewire", Some(target)) if !target.is_empty() => {
                Ok(SourceSpec::PipeWire(Some(target.to_string())))
            }
            _ => Err(format!(
                "Unknown source '{}' (expected test, v4l2:<device> or pipewire[:<target>])",
                s
            )),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::TestPattern => write!(f, "test"),
            SourceSpec::V4l2(path) => write!(f, "v4l2:{}", path),
            SourceSpec::PipeWire(Some(target)) => write!(f, "pipewire:{}", target),
            SourceSpec::PipeWire(None) => write!(f, "pipewire"),
        }
    }
}

/// Copy a possibly padded RGBA plane into a tightly packed buffer
fn pack_rows(src: &[u8], width: u32, height: u32, stride: usize) -> Option<Arc<[u8]>> {
    let row_bytes = width as usize * 4;
    if stride == row_bytes {
        return src.get(..row_bytes * height as usize).map(Arc::from);
    }

    let mut packed = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        packed.extend_from_slice(src.get(start..start + row_bytes)?);
    }
    Some(packed.into())
}

/// Live capture pipeline publishing RGBA frames at a fixed size
pub struct GstFrameSource {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    slot: Arc<FrameSlot>,
    running: bool,
}

impl GstFrameSource {
    /// Build and start `<source> ! videoconvert ! videoscale ! RGBA ! appsink`
    pub fn start(spec: &SourceSpec, width: u32, height: u32) -> Result<Self, RenderError> {
        gstreamer::init().map_err(|e| RenderError::ContextCreation(e.to_string()))?;

        let description = format!(
            "{} ! videoconvert ! videoscale ! video/x-raw,format={},width={},height={} ! appsink name=sink",
            spec.element_description(),
            pipeline::RGBA_FORMAT,
            width,
            height
        );
        info!(source = %spec, width, height, "Creating capture pipeline");
        debug!(pipeline = %description, "Capture pipeline description");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| RenderError::ContextCreation(format!("Capture pipeline: {}", e)))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| RenderError::ContextCreation("Not a pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| RenderError::ContextCreation("Failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| RenderError::ContextCreation("Failed to cast appsink".to_string()))?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let slot = FrameSlot::new();
        let callback_slot = Arc::clone(&slot);

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let frame_num = callback_slot.published();

                    let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
                        if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                            warn!(frame = frame_num, "Buffer marked as corrupted, skipping frame");
                        }
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }

                    let caps = sample.caps().ok_or(gstreamer::FlowError::Error)?;
                    let info = VideoInfo::from_caps(caps).map_err(|e| {
                        error!(error = ?e, "Failed to read capture caps");
                        gstreamer::FlowError::Error
                    })?;
                    let map = buffer.map_readable().map_err(|_| gstreamer::FlowError::Error)?;

                    let stride = info.stride()[0] as usize;
                    let Some(data) = pack_rows(map.as_slice(), info.width(), info.height(), stride)
                    else {
                        warn!(frame = frame_num, "Short capture buffer, skipping frame");
                        return Ok(gstreamer::FlowSuccess::Ok);
                    };

                    let sequence = callback_slot.publish(
                        data,
                        info.width(),
                        info.height(),
                        VERTICAL_FLIP_TRANSFORM,
                    );
                    if sequence % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frame = sequence,
                            width = info.width(),
                            height = info.height(),
                            "Captured frame"
                        );
                    }

                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| RenderError::ContextCreation(format!("Failed to start capture: {}", e)))?;

        let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::START_TIMEOUT_SECS,
        ));
        if let Err(e) = result {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(RenderError::ContextCreation(format!(
                "Capture pipeline did not start: {:?}",
                e
            )));
        }
        debug!(state = ?state, "Capture pipeline state");

        Ok(Self {
            pipeline,
            appsink,
            slot,
            running: true,
        })
    }

    /// Stop capture and release the device; idempotent
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        info!("Stopping capture pipeline");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop capture pipeline");
        }
        let _ = self.pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::STOP_TIMEOUT_SECS,
        ));
        self.slot.set_frame_signal(None);
    }
}

impl FrameSource for GstFrameSource {
    fn set_frame_signal(&self, signal: Option<FrameSignal>) {
        self.slot.set_frame_signal(signal);
    }

    fn acquire_latest(&self) -> Option<Frame> {
        self.slot.acquire_latest()
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_spec() {
        assert_eq!("test".parse::<SourceSpec>(), Ok(SourceSpec::TestPattern));
        assert_eq!(
            "v4l2:/dev/video0".parse::<SourceSpec>(),
            Ok(SourceSpec::V4l2("/dev/video0".to_string()))
        );
        assert_eq!(
            "pipewire".parse::<SourceSpec>(),
            Ok(SourceSpec::PipeWire(None))
        );
        assert_eq!(
            "pipewire:42".parse::<SourceSpec>(),
            Ok(SourceSpec::PipeWire(Some("42".to_string())))
        );
        assert!("v4l2".parse::<SourceSpec>().is_err());
        assert!("webcam".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn test_source_spec_display_round_trips() {
        let spec = SourceSpec::V4l2("/dev/video2".to_string());
        assert_eq!(spec.to_string().parse::<SourceSpec>(), Ok(spec));
    }

    #[test]
    fn test_pack_rows_strips_padding() {
        // 1x2 image with 8-byte stride
        let src = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        let packed = pack_rows(&src, 1, 2, 8).unwrap();
        assert_eq!(&packed[..], &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(pack_rows(&src[..10], 1, 2, 8).is_none());
    }
}
