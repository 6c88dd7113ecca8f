// SPDX-License-Identifier: GPL-3.0-only

//! Render and encode pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Frame source │ ──▶ │  Render worker    │ ──▶ │   Preview    │
//! │  (appsink)   │     │  - latest frame   │     │   surface    │
//! │              │     │  - quad per target│     └──────────────┘
//! └──────────────┘     │                   │     ┌──────────────┐     ┌──────────┐
//!                      │                   │ ──▶ │ Encoder input│ ──▶ │  Encode  │ ──▶ MP4
//!                      └───────────────────┘     │   surface    │     │  worker  │
//!                                                └──────────────┘     └──────────┘
//! ```
//!
//! The render worker and the encode worker are independent threads. The
//! preview path never waits on the encoder.
//!
//! # Modules
//!
//! - [`render`]: render engine and surface binding controller
//! - [`video`]: encode pipeline, drain loop and GStreamer encoder/muxer
//! - [`capture`]: both of the above driven together
//! - [`worker`]: dedicated worker threads

pub mod capture;
pub mod render;
pub mod video;
pub mod worker;

pub use capture::CapturePipeline;
