// SPDX-License-Identifier: GPL-3.0-only
//! Quad shader and the wgpu render backend
//!
//! A single WGSL program samples the frame texture through a per-frame
//! transform and draws it as a full-target quad.

mod gpu_processor;
pub mod quad_renderer;

pub use gpu_processor::{CachedDimensions, padded_bytes_per_row, strip_row_padding};
pub use quad_renderer::{QUAD_SHADER, QuadRenderer, QuadTarget};
