// SPDX-License-Identifier: GPL-3.0-only

//! Media helpers used by the encode pipeline
//!
//! The [`encoders`] module knows which H.264 encoder elements exist, which
//! to prefer, and how to configure each for a fixed bitrate and keyframe
//! interval.

pub mod encoders;
