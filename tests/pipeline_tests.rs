// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture pipeline
//!
//! Render engine and encode pipeline run on their real workers against
//! in-memory backends, so no GPU or GStreamer plugins are needed.

use dualcast::backends::source::{Frame, FrameSlot, FrameSource, VERTICAL_FLIP_TRANSFORM};
use dualcast::backends::surface::{RenderedImage, Surface, SurfaceHandle, check_size};
use dualcast::errors::{
    RecordingError, RenderError, STATUS_OK, SurfaceError, recording_status,
};
use dualcast::pipelines::CapturePipeline;
use dualcast::pipelines::render::{QuadUniforms, RenderBackend, RenderEngine};
use dualcast::pipelines::video::{
    AccessUnit, BufferFlags, ConfiguredEncoder, EncodePipeline, EncoderBackend, EncoderInput,
    EncoderOutput, EncoderSettings, Muxer, OutputFormat, VideoEncoder,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Render side
// ---------------------------------------------------------------------------

/// Preview surface counting presents
struct PreviewSurface {
    presents: AtomicU64,
}

impl Surface for PreviewSurface {
    fn is_valid(&self) -> bool {
        true
    }

    fn size(&self) -> (u32, u32) {
        (4, 4)
    }

    fn present(&self, _image: &RenderedImage) -> Result<(), SurfaceError> {
        self.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn label(&self) -> &str {
        "preview"
    }
}

/// Draws nothing; presents a black image sized to each target
struct BlankBackend {
    draws: Arc<Mutex<Vec<String>>>,
}

impl RenderBackend for BlankBackend {
    type Target = SurfaceHandle;

    fn create_target(&mut self, surface: SurfaceHandle) -> Result<SurfaceHandle, RenderError> {
        Ok(surface)
    }

    fn destroy_target(&mut self, _target: SurfaceHandle) {}

    fn update_texture(&mut self, _frame: &Frame) -> Result<(), RenderError> {
        Ok(())
    }

    fn draw(&mut self, target: &mut SurfaceHandle, _uniforms: &QuadUniforms) -> Result<(), RenderError> {
        if !target.is_valid() {
            return Err(RenderError::Draw(format!("{} is gone", target.label())));
        }
        self.draws.lock().unwrap().push(target.label().to_string());
        Ok(())
    }

    fn present(&mut self, target: &mut SurfaceHandle) -> Result<(), RenderError> {
        let (width, height) = target.size();
        let image = RenderedImage {
            data: vec![0u8; (width * height * 4) as usize].into(),
            width,
            height,
        };
        target.present(&image)?;
        Ok(())
    }

    fn release(&mut self) {}
}

// ---------------------------------------------------------------------------
// Encode side
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EncoderLog {
    settings: Mutex<Option<EncoderSettings>>,
    written: Mutex<Vec<Duration>>,
    presents_after_release: AtomicU64,
    finalized: AtomicU64,
}

struct MemoryInput {
    size: (u32, u32),
    queue: Arc<Mutex<VecDeque<Duration>>>,
    eos: Arc<AtomicBool>,
    released: AtomicBool,
    log: Arc<EncoderLog>,
}

impl Surface for MemoryInput {
    fn is_valid(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&self, image: &RenderedImage) -> Result<(), SurfaceError> {
        if !self.is_valid() {
            self.log.presents_after_release.fetch_add(1, Ordering::SeqCst);
            return Err(SurfaceError::Released);
        }
        check_size(self, image)?;
        let mut queue = self.queue.lock().unwrap();
        let pts = Duration::from_millis(33) * queue.len() as u32;
        queue.push_back(pts);
        Ok(())
    }

    fn label(&self) -> &str {
        "encoder"
    }
}

struct MemoryInputHandle(Arc<MemoryInput>);

impl EncoderInput for MemoryInputHandle {
    fn surface(&self) -> SurfaceHandle {
        self.0.clone()
    }

    fn signal_end_of_input(&self) -> Result<(), SurfaceError> {
        self.0.eos.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.0.released.store(true, Ordering::SeqCst);
    }
}

struct MemoryEncoder {
    queue: Arc<Mutex<VecDeque<Duration>>>,
    eos: Arc<AtomicBool>,
    size: (u32, u32),
    format_sent: bool,
    eos_sent: bool,
    index: usize,
}

impl VideoEncoder for MemoryEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput, RecordingError> {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(pts) if !self.format_sent => {
                self.queue.lock().unwrap().push_front(pts);
                self.format_sent = true;
                Ok(EncoderOutput::FormatChanged(OutputFormat {
                    mime: "video/avc".to_string(),
                    width: self.size.0,
                    height: self.size.1,
                    frame_rate: 30,
                    codec_data: None,
                }))
            }
            Some(pts) => {
                self.index += 1;
                Ok(EncoderOutput::Buffer(AccessUnit {
                    index: self.index,
                    data: vec![0; 64],
                    offset: 0,
                    size: 64,
                    pts,
                    flags: if self.index == 1 {
                        BufferFlags::KEY_FRAME
                    } else {
                        BufferFlags::NONE
                    },
                }))
            }
            None if self.eos.load(Ordering::SeqCst) && !self.eos_sent => {
                self.eos_sent = true;
                self.index += 1;
                Ok(EncoderOutput::Buffer(AccessUnit {
                    index: self.index,
                    data: Vec::new(),
                    offset: 0,
                    size: 0,
                    pts: Duration::ZERO,
                    flags: BufferFlags::END_OF_STREAM,
                }))
            }
            None => {
                std::thread::sleep(timeout);
                Ok(EncoderOutput::TryAgainLater)
            }
        }
    }

    fn release_output(&mut self, _index: usize) {}

    fn release(&mut self) {}
}

struct MemoryMuxer {
    log: Arc<EncoderLog>,
}

impl Muxer for MemoryMuxer {
    fn add_track(&mut self, _format: &OutputFormat) -> Result<usize, RecordingError> {
        Ok(0)
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        Ok(())
    }

    fn write_sample(&mut self, _track: usize, unit: &AccessUnit) -> Result<(), RecordingError> {
        self.log.written.lock().unwrap().push(unit.pts);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecordingError> {
        self.log.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {}
}

struct MemoryEncoderBackend {
    log: Arc<EncoderLog>,
}

impl EncoderBackend for MemoryEncoderBackend {
    fn configure_encoder(
        &self,
        settings: &EncoderSettings,
    ) -> Result<ConfiguredEncoder, RecordingError> {
        *self.log.settings.lock().unwrap() = Some(settings.clone());
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let eos = Arc::new(AtomicBool::new(false));
        let size = (settings.width, settings.height);
        Ok(ConfiguredEncoder {
            encoder: Box::new(MemoryEncoder {
                queue: Arc::clone(&queue),
                eos: Arc::clone(&eos),
                size,
                format_sent: false,
                eos_sent: false,
                index: 0,
            }),
            input: Arc::new(MemoryInputHandle(Arc::new(MemoryInput {
                size,
                queue,
                eos,
                released: AtomicBool::new(false),
                log: Arc::clone(&self.log),
            }))),
        })
    }

    fn create_muxer(&self, _path: &Path) -> Result<Box<dyn Muxer>, RecordingError> {
        Ok(Box::new(MemoryMuxer {
            log: Arc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    capture: CapturePipeline,
    slot: Arc<FrameSlot>,
    preview: Arc<PreviewSurface>,
    draws: Arc<Mutex<Vec<String>>>,
    log: Arc<EncoderLog>,
    binding: dualcast::pipelines::render::SurfaceBinding,
}

impl Harness {
    fn new() -> Self {
        let slot = FrameSlot::new();
        let preview = Arc::new(PreviewSurface {
            presents: AtomicU64::new(0),
        });
        let draws = Arc::new(Mutex::new(Vec::new()));
        let backend = BlankBackend {
            draws: Arc::clone(&draws),
        };

        let engine = RenderEngine::start(
            slot.clone() as Arc<dyn FrameSource>,
            preview.clone() as SurfaceHandle,
            move || Ok(backend),
        )
        .unwrap();
        let binding = engine.binding().unwrap();

        let log = Arc::new(EncoderLog::default());
        let encode = EncodePipeline::new(Arc::new(MemoryEncoderBackend {
            log: Arc::clone(&log),
        }));

        Self {
            capture: CapturePipeline::new(engine, encode).unwrap(),
            slot,
            preview,
            draws,
            log,
            binding,
        }
    }

    /// Publish one frame and wait until it has been rendered
    fn render_frame(&self) {
        self.slot
            .publish(vec![0u8; 16].into(), 2, 2, VERTICAL_FLIP_TRANSFORM);
        self.binding.flush(Duration::from_secs(5)).unwrap();
    }

    fn draws_to(&self, label: &str) -> usize {
        self.draws
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == label)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_record_round_trip() {
    let mut harness = Harness::new();
    let path = PathBuf::from("/tmp/out.mp4");

    let started = harness
        .capture
        .start_recording(&path, 1281, 721, Some(2_000_000));
    assert_eq!(recording_status(&started), STATUS_OK);
    assert!(harness.capture.is_recording());

    for _ in 0..30 {
        harness.render_frame();
    }

    assert_eq!(harness.capture.stop_recording(), Some(path));
    assert!(!harness.capture.is_recording());

    let settings = harness.log.settings.lock().unwrap().clone().unwrap();
    assert_eq!((settings.width, settings.height), (1282, 722));
    assert_eq!(settings.bitrate_bps, 2_000_000);

    assert!(harness.capture.frame_count() >= 30);
    assert_eq!(harness.log.written.lock().unwrap().len(), 30);
    assert_eq!(harness.log.finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn test_preview_continues_through_recording() {
    let mut harness = Harness::new();

    harness.render_frame();
    harness
        .capture
        .start_recording(Path::new("/tmp/preview.mp4"), 64, 64, None)
        .unwrap();
    for _ in 0..5 {
        harness.render_frame();
    }
    harness.capture.stop_recording();
    harness.render_frame();

    assert_eq!(harness.draws_to("preview"), 7);
    assert_eq!(harness.draws_to("encoder"), 5);
    assert_eq!(harness.preview.presents.load(Ordering::SeqCst), 7);
}

#[test]
fn test_no_draw_after_detach() {
    let mut harness = Harness::new();
    harness
        .capture
        .start_recording(Path::new("/tmp/detach.mp4"), 64, 64, None)
        .unwrap();
    harness.render_frame();
    harness.capture.stop_recording();

    let encoder_draws = harness.draws_to("encoder");
    for _ in 0..10 {
        harness.render_frame();
    }
    assert_eq!(harness.draws_to("encoder"), encoder_draws);
    assert_eq!(harness.log.presents_after_release.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stop_is_idempotent() {
    let mut harness = Harness::new();
    assert_eq!(harness.capture.stop_recording(), None);

    harness
        .capture
        .start_recording(Path::new("/tmp/idem.mp4"), 64, 64, None)
        .unwrap();
    harness.render_frame();

    assert!(harness.capture.stop_recording().is_some());
    assert_eq!(harness.capture.stop_recording(), None);
    assert_eq!(harness.log.finalized.load(Ordering::SeqCst), 1);
    assert!(!harness.capture.is_recording());
}

#[test]
fn test_second_start_reports_already_recording() {
    let mut harness = Harness::new();
    harness
        .capture
        .start_recording(Path::new("/tmp/first.mp4"), 64, 64, None)
        .unwrap();

    let second = harness
        .capture
        .start_recording(Path::new("/tmp/second.mp4"), 64, 64, None);
    assert_eq!(recording_status(&second), -1);

    assert_eq!(
        harness.capture.stop_recording(),
        Some(PathBuf::from("/tmp/first.mp4"))
    );
}

#[test]
fn test_sessions_can_repeat() {
    let mut harness = Harness::new();
    for round in 0..3 {
        let path = PathBuf::from(format!("/tmp/round{}.mp4", round));
        harness.capture.start_recording(&path, 64, 64, None).unwrap();
        harness.render_frame();
        harness.render_frame();
        assert_eq!(harness.capture.stop_recording(), Some(path));
        assert_eq!(harness.capture.frame_count(), 2);
    }
    assert_eq!(harness.log.finalized.load(Ordering::SeqCst), 3);

    let stats = harness.capture.render_stats();
    assert_eq!(stats.record_draws, 6);
    assert_eq!(stats.record_failures, 0);
}
