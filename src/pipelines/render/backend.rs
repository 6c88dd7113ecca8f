// SPDX-License-Identifier: GPL-3.0-only

//! Seam between the render worker and the GPU
//!
//! The worker decides *what* is drawn and *when*; a [`RenderBackend`] knows
//! how to do it on a particular graphics API. All methods run on the render
//! worker, so implementations don't need to be `Send`.

use crate::backends::source::{Frame, IDENTITY_TRANSFORM, Transform};
use crate::backends::surface::SurfaceHandle;
use crate::errors::RenderError;

/// Uniforms for one quad draw, laid out as the shader expects
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadUniforms {
    /// Model-view-projection applied to vertex positions
    pub mvp: Transform,
    /// Sampling transform applied to texture coordinates
    pub st: Transform,
}

impl QuadUniforms {
    /// Full-viewport quad sampled with the given transform
    pub fn for_frame(st: Transform) -> Self {
        Self {
            mvp: IDENTITY_TRANSFORM,
            st,
        }
    }
}

/// GPU operations the render worker needs
pub trait RenderBackend {
    /// Backend-specific render target bound to one surface
    type Target;

    /// Bind a surface as a render target
    fn create_target(&mut self, surface: SurfaceHandle) -> Result<Self::Target, RenderError>;

    /// Release a target; the surface itself belongs to its owner
    fn destroy_target(&mut self, target: Self::Target);

    /// Upload the frame into the external texture
    fn update_texture(&mut self, frame: &Frame) -> Result<(), RenderError>;

    /// Clear the target to black and draw the textured quad over its full size
    fn draw(&mut self, target: &mut Self::Target, uniforms: &QuadUniforms)
    -> Result<(), RenderError>;

    /// Present the drawn image to the target's surface
    fn present(&mut self, target: &mut Self::Target) -> Result<(), RenderError>;

    /// Release program, texture and context; called once on shutdown
    fn release(&mut self);
}
