// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Recording with a live preview
//! - Preview-only runs
//! - Listing available encoders

use chrono::Local;
use dualcast::backends::source::{FrameSource, GstFrameSource, SourceSpec};
use dualcast::backends::surface::{ChannelSurface, RenderedImage, SurfaceHandle};
use dualcast::constants::format_bitrate;
use dualcast::media::encoders::detection::missing_recording_elements;
use dualcast::media::encoders::{enumerate_h264_encoders, log_available_encoders};
use dualcast::pipelines::CapturePipeline;
use dualcast::pipelines::render::RenderEngine;
use dualcast::pipelines::video::{EncodePipeline, GstEncoderBackend};
use dualcast::{Config, QuadRenderer, recording_status};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Preview images buffered before new ones are dropped
const PREVIEW_QUEUE_DEPTH: usize = 4;

/// Options of the `record` command
pub struct RecordArgs {
    pub source: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u32>,
    pub duration: u64,
    pub output: Option<PathBuf>,
    pub encoder: Option<String>,
    pub snapshot: Option<PathBuf>,
}

/// What the preview consumer saw
struct PreviewSummary {
    frames: u64,
    last: Option<RenderedImage>,
}

/// Drain the preview channel until every sender is gone
fn spawn_preview_consumer(
    rt: &tokio::runtime::Runtime,
    mut frames: mpsc::Receiver<RenderedImage>,
) -> tokio::task::JoinHandle<PreviewSummary> {
    rt.spawn(async move {
        let mut summary = PreviewSummary {
            frames: 0,
            last: None,
        };
        while let Some(image) = frames.recv().await {
            summary.frames += 1;
            summary.last = Some(image);
        }
        summary
    })
}

/// Capture source, preview surface and render engine for one run
struct Session {
    source: Arc<GstFrameSource>,
    preview: Arc<ChannelSurface>,
    consumer: tokio::task::JoinHandle<PreviewSummary>,
}

fn start_session(
    rt: &tokio::runtime::Runtime,
    spec: &SourceSpec,
    width: u32,
    height: u32,
) -> Result<(Session, RenderEngine), Box<dyn std::error::Error>> {
    let source = Arc::new(GstFrameSource::start(spec, width, height)?);
    let (preview, frames) = ChannelSurface::new("preview", width, height, PREVIEW_QUEUE_DEPTH);
    let consumer = spawn_preview_consumer(rt, frames);

    let engine = RenderEngine::start(
        source.clone() as Arc<dyn FrameSource>,
        preview.clone() as SurfaceHandle,
        QuadRenderer::new,
    )?;

    Ok((
        Session {
            source,
            preview,
            consumer,
        },
        engine,
    ))
}

impl Session {
    /// Call after the render engine has stopped
    fn finish(
        self,
        rt: &tokio::runtime::Runtime,
    ) -> Result<(PreviewSummary, u64), Box<dyn std::error::Error>> {
        let dropped = self.preview.dropped_frames();
        drop(self.preview);
        drop(self.source);
        let summary = rt.block_on(self.consumer)?;
        Ok((summary, dropped))
    }
}

/// Sleep until `duration` passes or Ctrl+C, calling `progress` every 100ms
fn wait_for(
    duration: u64,
    mut progress: impl FnMut(Duration),
) -> Result<(), Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        progress(start.elapsed());
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();
    Ok(())
}

fn parse_source(config: &Config, source: Option<String>) -> Result<SourceSpec, String> {
    source.as_deref().unwrap_or(&config.source).parse()
}

/// Default output: `<output dir>/video_<timestamp>.mp4`
fn default_output_path(config: &Config) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    config
        .recordings_dir()
        .join(format!("video_{}.mp4", timestamp))
}

fn save_snapshot(image: &RenderedImage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let rgba = image::RgbaImage::from_raw(image.width, image.height, image.data.to_vec())
        .ok_or("Preview image has an unexpected size")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    rgba.save(path)?;
    Ok(())
}

/// Record while previewing
pub fn record(config: &Config, args: RecordArgs) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let spec = parse_source(config, args.source)?;
    let width = args.width.unwrap_or(config.preview_width);
    let height = args.height.unwrap_or(config.preview_height);
    let bitrate = config.resolve_bitrate(width, args.bitrate);
    let output_path = args.output.unwrap_or_else(|| default_output_path(config));

    println!("Source: {}", spec);
    println!("Size: {}x{}", width, height);
    println!("Bitrate: {}", format_bitrate(bitrate));
    println!("Output: {}", output_path.display());
    println!("Duration: {} seconds", args.duration);

    let rt = tokio::runtime::Runtime::new()?;
    let (session, engine) = start_session(&rt, &spec, width, height)?;

    let encode = EncodePipeline::new(Arc::new(GstEncoderBackend::new()))
        .with_preferred_encoder(args.encoder.or_else(|| config.preferred_encoder.clone()));
    let mut capture = CapturePipeline::new(engine, encode)?;

    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    let started = capture.start_recording(&output_path, width, height, Some(bitrate));
    if let Err(e) = started.as_ref() {
        return Err(format!(
            "Recording failed to start (status {}): {}",
            recording_status(&started),
            e
        )
        .into());
    }

    let status = capture.recording_status();
    wait_for(args.duration, |elapsed| {
        let secs = elapsed.as_secs();
        print!(
            "\rRecording: {:02}:{:02}  frames: {}",
            secs / 60,
            secs % 60,
            status.frame_count()
        );
    })?;

    let final_path = capture.stop_recording();
    let frames = capture.frame_count();
    let stats = capture.render_stats();
    // Stops the render worker
    drop(capture);

    let (preview, dropped) = session.finish(&rt)?;

    let final_path = final_path.ok_or("Recording did not finish")?;
    println!("Video saved: {}", final_path.display());
    println!("Frames encoded: {}", frames);
    println!(
        "Preview frames: {} ({} dropped, {} render failures)",
        preview.frames,
        dropped,
        stats.preview_failures + stats.record_failures
    );

    if let Some(path) = args.snapshot {
        match &preview.last {
            Some(image) => {
                save_snapshot(image, &path)?;
                println!("Snapshot saved: {}", path.display());
            }
            None => println!("No preview frame to save"),
        }
    }

    Ok(())
}

/// Preview only, reporting the achieved frame rate
pub fn preview(
    config: &Config,
    source: Option<String>,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let spec = parse_source(config, source)?;
    let (width, height) = (config.preview_width, config.preview_height);
    println!("Source: {}", spec);
    println!("Size: {}x{}", width, height);

    let rt = tokio::runtime::Runtime::new()?;
    let (session, mut engine) = start_session(&rt, &spec, width, height)?;

    let start = Instant::now();
    wait_for(duration, |elapsed| {
        print!("\rPreview: {:.1}s", elapsed.as_secs_f64());
    })?;
    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);

    let stats = engine.stats();
    engine.stop();
    drop(engine);

    let (preview, dropped) = session.finish(&rt)?;
    println!(
        "Rendered {} passes, {} preview frames ({} dropped), {:.1} fps",
        stats.passes,
        preview.frames,
        dropped,
        preview.frames as f64 / elapsed
    );

    Ok(())
}

/// List available encoders in the order they would be tried
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;
    log_available_encoders();

    let encoders = enumerate_h264_encoders();
    if encoders.is_empty() {
        println!("No H.264 encoders found.");
    } else {
        println!("Available H.264 encoders (in priority order):");
        println!();
        for (index, encoder) in encoders.iter().enumerate() {
            println!(
                "  [{}] {} ({})",
                index, encoder.display_name, encoder.element_name
            );
        }
    }

    let missing = missing_recording_elements();
    if !missing.is_empty() {
        println!();
        println!("Missing elements needed for recording: {}", missing.join(", "));
    }

    Ok(())
}
