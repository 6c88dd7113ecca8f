// SPDX-License-Identifier: GPL-3.0-only

//! Video recording: encode pipeline, drain loop and GStreamer backends
//!
//! [`EncodePipeline`] owns the recording state machine and runs the drain
//! loop on its own worker. It is written against the traits in [`session`];
//! [`GstEncoderBackend`] is the GStreamer implementation producing H.264 in
//! MP4.

pub mod encoder;
pub mod encoder_selection;
pub mod muxer;
pub mod recorder;
pub mod session;

pub use encoder::GstEncoderBackend;
pub use recorder::{EncodePipeline, RecordingState, RecordingStatus};
pub use session::{
    AccessUnit, BufferFlags, ConfiguredEncoder, EncoderBackend, EncoderInput, EncoderOutput,
    EncoderSettings, Muxer, OutputFormat, VideoEncoder,
};
