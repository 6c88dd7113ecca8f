// SPDX-License-Identifier: GPL-3.0-only

//! Encoder session building blocks
//!
//! The drain loop talks to an encoder and a muxer only through these traits,
//! so the state machine can run against GStreamer or against in-memory
//! implementations.

use crate::backends::surface::SurfaceHandle;
use crate::constants::{FRAME_RATE, KEYFRAME_INTERVAL_SECS};
use crate::errors::{RecordingError, SurfaceError};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Flags carried by an encoded buffer
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(BufferFlags::KEY_FRAME) {
            names.push("KEY_FRAME");
        }
        if self.contains(BufferFlags::CODEC_CONFIG) {
            names.push("CODEC_CONFIG");
        }
        if self.contains(BufferFlags::END_OF_STREAM) {
            names.push("END_OF_STREAM");
        }
        write!(f, "BufferFlags({})", names.join(" | "))
    }
}

/// One encoded buffer dequeued from the encoder
#[derive(Clone)]
pub struct AccessUnit {
    /// Encoder-side buffer index, handed back through `release_output`
    pub index: usize,
    pub data: Vec<u8>,
    /// Valid payload is `data[offset..offset + size]`
    pub offset: usize,
    pub size: usize,
    pub pts: Duration,
    pub flags: BufferFlags,
}

impl AccessUnit {
    pub fn payload(&self) -> &[u8] {
        let end = (self.offset + self.size).min(self.data.len());
        self.data.get(self.offset..end).unwrap_or(&[])
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

impl fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessUnit")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("pts", &self.pts)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Format negotiated by the encoder, reported once before the first buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Codec configuration (SPS/PPS as avcC) if the encoder provides it
    pub codec_data: Option<Vec<u8>>,
}

/// Result of one bounded poll of the encoder
#[derive(Debug)]
pub enum EncoderOutput {
    FormatChanged(OutputFormat),
    Buffer(AccessUnit),
    /// Nothing became available within the timeout
    TryAgainLater,
}

/// Parameters for one encoder session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Even width in pixels
    pub width: u32,
    /// Even height in pixels
    pub height: u32,
    pub bitrate_bps: u32,
    pub frame_rate: u32,
    pub keyframe_interval_secs: u32,
    /// Force a specific encoder element instead of the priority order
    pub preferred_encoder: Option<String>,
}

impl EncoderSettings {
    /// Settings with the fixed frame rate and keyframe interval
    pub fn new(width: u32, height: u32, bitrate_bps: u32) -> Self {
        Self {
            width,
            height,
            bitrate_bps,
            frame_rate: FRAME_RATE,
            keyframe_interval_secs: KEYFRAME_INTERVAL_SECS,
            preferred_encoder: None,
        }
    }
}

/// Output side of a running encoder, owned by the encode worker
pub trait VideoEncoder: Send {
    /// Wait up to `timeout` for the next event
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput, RecordingError>;

    /// Hand a dequeued buffer back to the encoder
    fn release_output(&mut self, index: usize);

    /// Stop the encoder and free it; idempotent
    fn release(&mut self);
}

/// Input side of a running encoder
///
/// The surface is drawn into by the render worker; the pipeline signals end
/// of input and releases it.
pub trait EncoderInput: Send + Sync {
    /// The drawable the render worker binds as the record target
    fn surface(&self) -> SurfaceHandle;

    /// No more frames will be submitted; the encoder should flush and emit EOS
    fn signal_end_of_input(&self) -> Result<(), SurfaceError>;

    /// Invalidate the surface; later presents fail with `Released`
    fn release(&self);
}

/// A configured and started encoder split into its two sides
pub struct ConfiguredEncoder {
    pub encoder: Box<dyn VideoEncoder>,
    pub input: std::sync::Arc<dyn EncoderInput>,
}

/// Container writer for a single video track
pub trait Muxer: Send {
    /// Register the negotiated format; returns the track index
    fn add_track(&mut self, format: &OutputFormat) -> Result<usize, RecordingError>;

    fn start(&mut self) -> Result<(), RecordingError>;

    fn write_sample(&mut self, track: usize, unit: &AccessUnit) -> Result<(), RecordingError>;

    /// Finalize the container; only called after a successful `start`
    fn stop(&mut self) -> Result<(), RecordingError>;

    /// Free resources; idempotent
    fn release(&mut self);
}

/// Factory for encoders and muxers
pub trait EncoderBackend: Send + Sync {
    /// Create, configure and start an encoder
    fn configure_encoder(
        &self,
        settings: &EncoderSettings,
    ) -> Result<ConfiguredEncoder, RecordingError>;

    /// Create a muxer writing to `path`
    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>, RecordingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert_eq!(format!("{:?}", flags), "BufferFlags(KEY_FRAME | END_OF_STREAM)");
    }

    #[test]
    fn test_payload_respects_offset_and_size() {
        let unit = AccessUnit {
            index: 0,
            data: vec![0, 1, 2, 3, 4],
            offset: 1,
            size: 3,
            pts: Duration::ZERO,
            flags: BufferFlags::NONE,
        };
        assert_eq!(unit.payload(), &[1, 2, 3]);

        let empty = AccessUnit { size: 0, ..unit };
        assert!(empty.payload().is_empty());
    }

    #[test]
    fn test_default_settings() {
        let settings = EncoderSettings::new(1282, 722, 2_000_000);
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.keyframe_interval_secs, 1);
    }
}
