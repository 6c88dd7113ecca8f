// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU helpers for the render worker
//!
//! - Dimension caching so textures are only reallocated on size change
//! - Row-padding arithmetic for texture to buffer copies
//! - Async buffer readback

use crate::gpu::wgpu;

/// Cached resource dimensions, avoids reallocation when dimensions match
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if dimensions have changed and need update
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }
}

/// Bytes per row of an RGBA copy, rounded up to the copy alignment
#[inline]
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Drop the per-row padding added for the copy
pub fn strip_row_padding(padded: &[u8], width: u32, height: u32, padded_row: u32) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    if padded_row as usize == row_bytes {
        return padded[..row_bytes * height as usize].to_vec();
    }

    let mut packed = Vec::with_capacity(row_bytes * height as usize);
    for row in padded
        .chunks(padded_row as usize)
        .take(height as usize)
    {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    packed
}

/// Buffer readback (map, poll, read, unmap)
///
/// `buffer` must have `MAP_READ` usage and the copy into it must already be
/// submitted.
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_dimensions() {
        let dims = CachedDimensions::new(640, 480);
        assert!(!dims.needs_update(640, 480));
        assert!(dims.needs_update(1280, 720));
        assert!(dims.needs_update(640, 482));
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(1280), 5120);
        assert_eq!(padded_bytes_per_row(1282), 5376);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_strip_row_padding() {
        // 2x2 image, 12-byte rows
        let padded = [
            1, 1, 1, 1, 2, 2, 2, 2, 0, 0, 0, 0, //
            3, 3, 3, 3, 4, 4, 4, 4, 0, 0, 0, 0,
        ];
        let packed = strip_row_padding(&padded, 2, 2, 12);
        assert_eq!(
            packed,
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]
        );
    }
}
