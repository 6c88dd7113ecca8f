// SPDX-License-Identifier: GPL-3.0-only

//! H.264 encoder selection and configuration
//!
//! - Hardware encoder priority with software fallbacks
//! - Per-element bitrate and keyframe configuration
//! - Installed element detection

pub mod detection;
pub mod video;

pub use detection::{is_element_available, log_available_encoders};
pub use video::{EncoderInfo, enumerate_h264_encoders};
