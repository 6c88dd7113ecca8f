// SPDX-License-Identifier: GPL-3.0-only

//! Drawable surfaces the render engine presents into
//!
//! A surface is an opaque handle owned by someone else: the host's preview
//! sink or the encoder's input. The render worker only needs to know its
//! size, whether it is still usable, and how to hand it a finished image.

use crate::errors::SurfaceError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// One finished RGBA image, tightly packed (`width * 4` bytes per row)
#[derive(Clone)]
pub struct RenderedImage {
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for RenderedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A drawable destination
///
/// Implementations must be cheap to query; `present` is called on the render
/// worker once per pass.
pub trait Surface: Send + Sync {
    /// False once the owner has released the surface
    fn is_valid(&self) -> bool;

    /// Configured size in pixels
    fn size(&self) -> (u32, u32);

    /// Hand over a finished image of exactly [`size`](Self::size)
    fn present(&self, image: &RenderedImage) -> Result<(), SurfaceError>;

    /// Short name for logs
    fn label(&self) -> &str;
}

/// Shared handle passed between the encode pipeline and the render worker
pub type SurfaceHandle = Arc<dyn Surface>;

/// Reject images that don't match the surface
pub fn check_size(surface: &dyn Surface, image: &RenderedImage) -> Result<(), SurfaceError> {
    let expected = surface.size();
    let actual = (image.width, image.height);
    if expected != actual {
        return Err(SurfaceError::SizeMismatch { expected, actual });
    }
    Ok(())
}

/// Preview surface backed by a bounded tokio channel
///
/// Presents never block the render worker: when the consumer lags, the new
/// image is dropped and counted.
pub struct ChannelSurface {
    label: String,
    size: (u32, u32),
    sender: mpsc::Sender<RenderedImage>,
    valid: AtomicBool,
    dropped: AtomicU64,
}

impl ChannelSurface {
    pub fn new(
        label: &str,
        width: u32,
        height: u32,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<RenderedImage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let surface = Arc::new(Self {
            label: label.to_string(),
            size: (width, height),
            sender,
            valid: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });
        (surface, receiver)
    }

    /// Mark the surface unusable; later presents fail with `Released`
    pub fn release(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Images dropped because the consumer was behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Surface for ChannelSurface {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&self, image: &RenderedImage) -> Result<(), SurfaceError> {
        if !self.is_valid() {
            return Err(SurfaceError::Released);
        }
        check_size(self, image)?;

        match self.sender.try_send(image.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(surface = %self.label, dropped, "Preview consumer behind, dropping image");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SurfaceError::Released),
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> RenderedImage {
        RenderedImage {
            data: vec![0u8; (width * height * 4) as usize].into(),
            width,
            height,
        }
    }

    #[test]
    fn test_channel_surface_delivers_and_drops() {
        let (surface, mut rx) = ChannelSurface::new("preview", 4, 2, 1);
        surface.present(&image(4, 2)).unwrap();
        surface.present(&image(4, 2)).unwrap();
        assert_eq!(surface.dropped_frames(), 1);

        let received = rx.try_recv().unwrap();
        assert_eq!((received.width, received.height), (4, 2));
    }

    #[test]
    fn test_channel_surface_rejects_wrong_size() {
        let (surface, _rx) = ChannelSurface::new("preview", 4, 2, 1);
        assert_eq!(
            surface.present(&image(2, 2)),
            Err(SurfaceError::SizeMismatch {
                expected: (4, 2),
                actual: (2, 2)
            })
        );
    }

    #[test]
    fn test_channel_surface_release() {
        let (surface, rx) = ChannelSurface::new("preview", 4, 2, 1);
        surface.release();
        assert!(!surface.is_valid());
        assert_eq!(surface.present(&image(4, 2)), Err(SurfaceError::Released));

        let (surface, rx2) = ChannelSurface::new("preview", 4, 2, 1);
        drop(rx2);
        assert!(!surface.is_valid());
        drop(rx);
    }
}
