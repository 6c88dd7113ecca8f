// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources and drawable surfaces
//!
//! ```text
//! ┌──────────────────┐                ┌──────────────────┐
//! │   Frame source   │ ── frames ──▶  │   Render worker  │
//! │ (GStreamer/slot) │ ◀── signal ──  │                  │
//! └──────────────────┘                └────────┬─────────┘
//!                                              │ present
//!                                     ┌────────┴─────────┐
//!                                     │     Surfaces     │
//!                                     │ preview / encoder│
//!                                     └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`source`]: latest-frame slot, frame signal and the GStreamer capture source
//! - [`surface`]: drawable handles the render worker presents into

pub mod source;
pub mod surface;
