// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer H.264 encoder session
//!
//! ```text
//! appsrc (RGBA) ! videoconvert ! <h264 encoder> ! h264parse ! avc,au ! appsink
//! ```
//!
//! Rendered images pushed into the input surface are timestamped from the
//! first submitted frame. The drain loop pulls encoded access units from the
//! appsink with a bounded wait.

use super::encoder_selection::select_h264_encoder;
use super::muxer::GstMuxer;
use super::session::{
    AccessUnit, BufferFlags, ConfiguredEncoder, EncoderBackend, EncoderInput, EncoderOutput,
    EncoderSettings, Muxer, OutputFormat, VideoEncoder,
};
use crate::backends::surface::{RenderedImage, Surface, SurfaceHandle, check_size};
use crate::constants::{frame_duration, pipeline};
use crate::errors::{RecordingError, SurfaceError};
use crate::media::encoders::video::H264_PARSER;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// MIME type reported in the output format
pub const H264_MIME: &str = "video/avc";

/// How long to watch the bus for early errors after starting
const START_ERROR_CHECK_MS: u64 = 250;

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

fn config_error(context: &str, e: impl std::fmt::Display) -> RecordingError {
    RecordingError::EncoderConfiguration(format!("{}: {}", context, e))
}

/// Creates GStreamer encoder sessions and MP4 muxers
#[derive(Debug, Default, Clone)]
pub struct GstEncoderBackend;

impl GstEncoderBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderBackend for GstEncoderBackend {
    fn configure_encoder(
        &self,
        settings: &EncoderSettings,
    ) -> Result<ConfiguredEncoder, RecordingError> {
        gst::init().map_err(|e| config_error("GStreamer init", e))?;

        let selected =
            select_h264_encoder(settings).map_err(RecordingError::EncoderConfiguration)?;

        let input_caps = gst::Caps::builder("video/x-raw")
            .field("format", pipeline::RGBA_FORMAT)
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gst::Fraction::new(settings.frame_rate as i32, 1))
            .build();
        let output_caps: gst::Caps = pipeline::H264_AVC_CAPS
            .parse()
            .map_err(|e| config_error("Output caps", e))?;

        let appsrc = AppSrc::builder()
            .caps(&input_caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let appsink = AppSink::builder().sync(false).build();

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| config_error("videoconvert", e))?;
        let parser = gst::ElementFactory::make(H264_PARSER)
            .build()
            .map_err(|e| config_error(H264_PARSER, e))?;
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &output_caps)
            .build()
            .map_err(|e| config_error("capsfilter", e))?;

        let encode_pipeline = gst::Pipeline::with_name("dualcast-encoder");
        let elements = [
            appsrc.upcast_ref::<gst::Element>(),
            &convert,
            &selected.element,
            &parser,
            &capsfilter,
            appsink.upcast_ref::<gst::Element>(),
        ];
        encode_pipeline
            .add_many(elements)
            .map_err(|e| config_error("Adding elements", e))?;
        gst::Element::link_many(elements).map_err(|e| config_error("Linking elements", e))?;

        let bus = encode_pipeline
            .bus()
            .ok_or_else(|| RecordingError::EncoderConfiguration("Pipeline has no bus".into()))?;

        if let Err(e) = encode_pipeline.set_state(gst::State::Playing) {
            let _ = encode_pipeline.set_state(gst::State::Null);
            return Err(config_error("Failed to start encoder", e));
        }

        if let Some(msg) = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(START_ERROR_CHECK_MS),
            &[gst::MessageType::Error],
        ) && let gst::MessageView::Error(err) = msg.view()
        {
            let _ = encode_pipeline.set_state(gst::State::Null);
            return Err(config_error(&selected.info.element_name, err.error()));
        }

        info!(
            encoder = %selected.info.display_name,
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate_bps,
            "Encoder started"
        );

        let surface = Arc::new(GstInputSurface {
            appsrc,
            size: (settings.width, settings.height),
            released: AtomicBool::new(false),
            clock: Mutex::new(PtsClock::default()),
            label: format!("encoder:{}", selected.info.element_name),
        });

        Ok(ConfiguredEncoder {
            encoder: Box::new(GstVideoEncoder {
                pipeline: encode_pipeline,
                appsink,
                bus,
                settings: settings.clone(),
                caps: None,
                pending: None,
                next_index: 0,
                last_pts: Duration::ZERO,
                eos_reported: false,
                released: false,
            }),
            input: Arc::new(GstEncoderInput { surface }),
        })
    }

    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>, RecordingError> {
        Ok(Box::new(GstMuxer::create(path)?))
    }
}

/// Timestamps relative to the first submitted frame
#[derive(Default)]
struct PtsClock {
    first: Option<Instant>,
    last: Option<Duration>,
}

impl PtsClock {
    /// Strictly increasing presentation time for a frame submitted `now`
    fn next(&mut self, now: Instant) -> Duration {
        let start = *self.first.get_or_insert(now);
        let mut pts = now.saturating_duration_since(start);
        if let Some(last) = self.last
            && pts <= last
        {
            pts = last + Duration::from_micros(1);
        }
        self.last = Some(pts);
        pts
    }
}

/// Drawable the render worker presents into
struct GstInputSurface {
    appsrc: AppSrc,
    size: (u32, u32),
    released: AtomicBool,
    clock: Mutex<PtsClock>,
    label: String,
}

impl Surface for GstInputSurface {
    fn is_valid(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&self, image: &RenderedImage) -> Result<(), SurfaceError> {
        if !self.is_valid() {
            return Err(SurfaceError::Released);
        }
        check_size(self, image)?;

        let pts = self
            .clock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next(Instant::now());

        let mut buffer = gst::Buffer::from_slice(Arc::clone(&image.data));
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(clock_time(pts));
            buffer.set_duration(clock_time(frame_duration()));
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| SurfaceError::Push(format!("{:?}", e)))
    }

    fn label(&self) -> &str {
        &self.label
    }
}

struct GstEncoderInput {
    surface: Arc<GstInputSurface>,
}

impl EncoderInput for GstEncoderInput {
    fn surface(&self) -> SurfaceHandle {
        self.surface.clone()
    }

    fn signal_end_of_input(&self) -> Result<(), SurfaceError> {
        debug!("Signalling end of input to encoder");
        self.surface
            .appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| SurfaceError::Push(format!("{:?}", e)))
    }

    fn release(&self) {
        self.surface.released.store(true, Ordering::SeqCst);
    }
}

/// Output side of the encoder pipeline
struct GstVideoEncoder {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    bus: gst::Bus,
    settings: EncoderSettings,
    caps: Option<gst::Caps>,
    /// First buffer, held back while the format change is reported
    pending: Option<AccessUnit>,
    next_index: usize,
    last_pts: Duration,
    eos_reported: bool,
    released: bool,
}

impl GstVideoEncoder {
    fn output_format(&self, caps: &gst::CapsRef) -> OutputFormat {
        let structure = caps.structure(0);
        let int_field = |name: &str, fallback: u32| {
            structure
                .and_then(|s| s.get::<i32>(name).ok())
                .map(|v| v as u32)
                .unwrap_or(fallback)
        };
        let frame_rate = structure
            .and_then(|s| s.get::<gst::Fraction>("framerate").ok())
            .filter(|f| f.numer() > 0 && f.denom() > 0)
            .map(|f| (f.numer() / f.denom()) as u32)
            .unwrap_or(self.settings.frame_rate);
        let codec_data = structure
            .and_then(|s| s.get::<gst::Buffer>("codec_data").ok())
            .and_then(|b| b.map_readable().ok().map(|m| m.to_vec()));

        OutputFormat {
            mime: H264_MIME.to_string(),
            width: int_field("width", self.settings.width),
            height: int_field("height", self.settings.height),
            frame_rate,
            codec_data,
        }
    }

    fn unit_from_sample(&mut self, sample: &gst::Sample) -> Result<AccessUnit, RecordingError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| RecordingError::Drain("Sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| RecordingError::Drain(format!("Unmappable buffer: {}", e)))?;

        let pts = buffer
            .pts()
            .map(|t| Duration::from_nanos(t.nseconds()))
            .unwrap_or(self.last_pts);
        self.last_pts = pts;

        let mut flags = BufferFlags::NONE;
        if !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            flags |= BufferFlags::KEY_FRAME;
        }
        if buffer.flags().contains(gst::BufferFlags::HEADER) {
            flags |= BufferFlags::CODEC_CONFIG;
        }

        let data = map.to_vec();
        self.next_index += 1;
        Ok(AccessUnit {
            index: self.next_index,
            size: data.len(),
            data,
            offset: 0,
            pts,
            flags,
        })
    }

    fn bus_error(&self) -> Option<RecordingError> {
        let msg = self.bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(RecordingError::Drain(format!(
                "{} ({:?})",
                err.error(),
                err.debug()
            ))),
            _ => None,
        }
    }
}

impl VideoEncoder for GstVideoEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput, RecordingError> {
        if let Some(unit) = self.pending.take() {
            return Ok(EncoderOutput::Buffer(unit));
        }
        if let Some(e) = self.bus_error() {
            return Err(e);
        }

        let Some(sample) = self.appsink.try_pull_sample(clock_time(timeout)) else {
            if self.appsink.is_eos() {
                if !self.eos_reported {
                    self.eos_reported = true;
                    self.next_index += 1;
                    return Ok(EncoderOutput::Buffer(AccessUnit {
                        index: self.next_index,
                        data: Vec::new(),
                        offset: 0,
                        size: 0,
                        pts: self.last_pts,
                        flags: BufferFlags::END_OF_STREAM,
                    }));
                }
                // try_pull_sample returns at once after EOS
                std::thread::sleep(timeout);
            }
            return Ok(EncoderOutput::TryAgainLater);
        };

        let unit = self.unit_from_sample(&sample)?;
        let caps = sample.caps().map(|c| c.to_owned());

        match (&self.caps, caps) {
            (None, Some(caps)) => {
                let format = self.output_format(&caps);
                debug!(?format, "Encoder output format");
                self.caps = Some(caps);
                self.pending = Some(unit);
                Ok(EncoderOutput::FormatChanged(format))
            }
            (Some(current), Some(caps)) if *current != caps => {
                warn!(caps = %caps, "Encoder renegotiated output caps mid-stream");
                self.caps = Some(caps);
                Ok(EncoderOutput::Buffer(unit))
            }
            _ => Ok(EncoderOutput::Buffer(unit)),
        }
    }

    fn release_output(&mut self, _index: usize) {
        // Samples are reference counted; dropping the unit returns the memory
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!("Releasing encoder pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop encoder pipeline");
        }
    }
}

impl Drop for GstVideoEncoder {
    fn drop(&mut self) {
        self.release();
    }
}
