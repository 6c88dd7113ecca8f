// SPDX-License-Identifier: GPL-3.0-only

//! Dualcast - render live video to a preview and a hardware encoder at once
//!
//! Frames from a capture source are drawn by one render worker into a
//! preview surface and, while recording, into the input surface of an H.264
//! encoder. A second worker drains the encoder into an MP4 file.
//!
//! # Architecture
//!
//! - [`backends`]: frame sources and drawable surfaces
//! - [`gpu`]: wgpu device creation
//! - [`shaders`]: quad shader and the wgpu render backend
//! - [`pipelines`]: render engine, encode pipeline and the capture pipeline
//! - [`media`]: H.264 encoder table and element detection
//! - [`config`]: user configuration
//!
//! # Example
//!
//! ```ignore
//! let source = Arc::new(GstFrameSource::start(&SourceSpec::TestPattern, 1280, 720)?);
//! let (preview, frames) = ChannelSurface::new("preview", 1280, 720, 2);
//! let engine = RenderEngine::start(source, preview, QuadRenderer::new)?;
//! let encode = EncodePipeline::new(Arc::new(GstEncoderBackend::new()));
//! let mut capture = CapturePipeline::new(engine, encode)?;
//! capture.start_recording(Path::new("/tmp/out.mp4"), 1280, 720, None)?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod shaders;

// Re-export commonly used types
pub use backends::source::{FrameSlot, FrameSource, GstFrameSource, SourceSpec};
pub use backends::surface::{ChannelSurface, RenderedImage, Surface, SurfaceHandle};
pub use config::Config;
pub use constants::BitratePreset;
pub use errors::{
    AppError, AppResult, RecordingError, RenderError, STATUS_OK, SurfaceError, recording_status,
};
pub use pipelines::CapturePipeline;
pub use pipelines::render::{RenderEngine, SurfaceBinding};
pub use pipelines::video::{EncodePipeline, GstEncoderBackend};
pub use shaders::QuadRenderer;
