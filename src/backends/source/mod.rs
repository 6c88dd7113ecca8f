// SPDX-License-Identifier: GPL-3.0-only

//! Frame source adapter
//!
//! Capture backends publish into a [`FrameSlot`]; the render worker pulls the
//! newest frame from it. There is no queue: publishing replaces whatever was
//! there, and the notification is coalesced so a burst of frames produces a
//! single render pass.

pub mod gstreamer;

pub use self::gstreamer::{GstFrameSource, SourceSpec};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// 4x4 column-major sampling transform applied to texture coordinates
pub type Transform = [f32; 16];

pub const IDENTITY_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Flip v so that row 0 of the capture lands at the top of the quad
pub const VERTICAL_FLIP_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0,
];

/// Latest captured image plus how to sample it
#[derive(Clone)]
pub struct Frame {
    /// Tightly packed RGBA (`width * 4` bytes per row)
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub transform: Transform,
    /// Monotonic per-slot publish counter, starting at 1
    pub sequence: u64,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// "New frame ready" notification towards the render worker
///
/// Carries no payload. The pending flag guarantees at most one outstanding
/// wake-up: raising it again before the consumer clears it does nothing.
#[derive(Clone)]
pub struct FrameSignal {
    pending: Arc<AtomicBool>,
    wake: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl FrameSignal {
    /// `wake` enqueues one render pass and returns false if the consumer is gone
    pub fn new<W>(wake: W) -> Self
    where
        W: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(wake),
        }
    }

    /// Notify the consumer unless a notification is already outstanding
    pub fn raise(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if !(self.wake)() {
            self.pending.store(false, Ordering::Release);
        }
    }

    /// Consumer side: clear the flag before pulling the frame
    pub fn clear(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Something the render engine can pull frames from
pub trait FrameSource: Send + Sync {
    /// Install (or remove) the notification fired on every new frame
    fn set_frame_signal(&self, signal: Option<FrameSignal>);

    /// Newest frame, or `None` before the first one arrives
    ///
    /// Only the render worker calls this. Two calls with no publish in between
    /// return the same image.
    fn acquire_latest(&self) -> Option<Frame>;
}

/// Single-frame mailbox shared between a capture backend and the renderer
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    signal: Mutex<Option<FrameSignal>>,
    sequence: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the current frame and notify; returns the new sequence number
    ///
    /// `data` must hold `width * height * 4` bytes of packed RGBA.
    pub fn publish(&self, data: Arc<[u8]>, width: u32, height: u32, transform: Transform) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = Frame {
            data,
            width,
            height,
            transform,
            sequence,
        };

        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(frame);
        }

        let signal = self.signal.lock().ok().and_then(|s| s.clone());
        if let Some(signal) = signal {
            signal.raise();
        }
        sequence
    }

    /// Number of frames published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

impl FrameSource for FrameSlot {
    fn set_frame_signal(&self, signal: Option<FrameSignal>) {
        if let Ok(mut current) = self.signal.lock() {
            *current = signal;
        }
    }

    fn acquire_latest(&self) -> Option<Frame> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn pixels(width: u32, height: u32) -> Arc<[u8]> {
        vec![0u8; (width * height * 4) as usize].into()
    }

    #[test]
    fn test_acquire_without_new_frame_returns_same_image() {
        let slot = FrameSlot::new();
        assert!(slot.acquire_latest().is_none());

        slot.publish(pixels(2, 2), 2, 2, IDENTITY_TRANSFORM);
        let first = slot.acquire_latest().unwrap();
        let second = slot.acquire_latest().unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert!(Arc::ptr_eq(&first.data, &second.data));
    }

    #[test]
    fn test_signal_coalesces_until_cleared() {
        let wakes = Arc::new(AtomicU32::new(0));
        let wakes_clone = Arc::clone(&wakes);
        let signal = FrameSignal::new(move || {
            wakes_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        let slot = FrameSlot::new();
        slot.set_frame_signal(Some(signal.clone()));
        for _ in 0..5 {
            slot.publish(pixels(1, 1), 1, 1, IDENTITY_TRANSFORM);
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert!(signal.clear());
        slot.publish(pixels(1, 1), 1, 1, IDENTITY_TRANSFORM);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(slot.acquire_latest().unwrap().sequence, 6);
    }

    #[test]
    fn test_failed_wake_leaves_signal_clear() {
        let signal = FrameSignal::new(|| false);
        signal.raise();
        assert!(!signal.is_pending());
    }
}
