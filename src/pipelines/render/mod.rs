// SPDX-License-Identifier: GPL-3.0-only

//! Render engine
//!
//! One dedicated worker owns the graphics context and every render target.
//! Frame notifications and target changes arrive as [`RenderTask`]s and are
//! handled strictly in order, so a target swap is never interleaved with a
//! pass that was queued before it.
//!
//! Each pass pulls the latest frame and draws it into the preview target and
//! then, if one is bound, the record target. A failure on one target is
//! logged and counted; the other target still gets its frame.

pub mod backend;
pub mod binding;

pub use backend::{QuadUniforms, RenderBackend};
pub use binding::SurfaceBinding;

use crate::backends::source::{FrameSignal, FrameSource};
use crate::backends::surface::SurfaceHandle;
use crate::constants::timing;
use crate::errors::RenderError;
use crate::pipelines::worker::{LoopAction, TaskWorker, WorkerTask};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

/// Messages handled by the render worker
pub enum RenderTask {
    /// A new frame is available
    RenderFrame,
    /// Replace the record target (`None` detaches it)
    AttachRecordTarget(Option<SurfaceHandle>),
    /// Acknowledge once every earlier task has been handled
    Flush(Sender<()>),
    /// Tear everything down and exit
    Shutdown,
    /// Block the worker until the sender side is dropped or signalled
    #[cfg(test)]
    Pause(std::sync::mpsc::Receiver<()>),
}

impl WorkerTask for RenderTask {
    fn shutdown() -> Self {
        RenderTask::Shutdown
    }
}

/// Which of the two targets an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Preview,
    Record,
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Preview => "preview",
            TargetKind::Record => "record",
        }
    }
}

#[derive(Default)]
struct RenderCounters {
    passes: AtomicU64,
    preview_draws: AtomicU64,
    record_draws: AtomicU64,
    preview_failures: AtomicU64,
    record_failures: AtomicU64,
    last_sequence: AtomicU64,
}

impl RenderCounters {
    fn record_draw(&self, kind: TargetKind, ok: bool) {
        let counter = match (kind, ok) {
            (TargetKind::Preview, true) => &self.preview_draws,
            (TargetKind::Preview, false) => &self.preview_failures,
            (TargetKind::Record, true) => &self.record_draws,
            (TargetKind::Record, false) => &self.record_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of render worker activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Render passes that had a frame to draw
    pub passes: u64,
    pub preview_draws: u64,
    pub record_draws: u64,
    pub preview_failures: u64,
    pub record_failures: u64,
    /// Sequence number of the last frame drawn
    pub last_sequence: u64,
}

/// State owned by the render worker thread
struct RenderState<B: RenderBackend> {
    backend: B,
    source: Arc<dyn FrameSource>,
    signal: FrameSignal,
    preview: Option<B::Target>,
    record: Option<B::Target>,
    counters: Arc<RenderCounters>,
    released: bool,
}

impl<B: RenderBackend> RenderState<B> {
    fn handle(&mut self, task: RenderTask) -> LoopAction {
        match task {
            RenderTask::RenderFrame => self.render_frame(),
            RenderTask::AttachRecordTarget(surface) => self.attach_record_target(surface),
            RenderTask::Flush(ack) => {
                let _ = ack.send(());
            }
            RenderTask::Shutdown => {
                self.teardown();
                return LoopAction::Stop;
            }
            #[cfg(test)]
            RenderTask::Pause(resume) => {
                let _ = resume.recv();
            }
        }
        LoopAction::Continue
    }

    fn render_frame(&mut self) {
        // Clear before acquiring so a frame published mid-pass queues another pass
        self.signal.clear();

        let Some(frame) = self.source.acquire_latest() else {
            debug!("Frame notification without a frame");
            return;
        };

        if let Err(e) = self.backend.update_texture(&frame) {
            warn!(error = %e, "Failed to upload frame texture");
            return;
        }

        let passes = self.counters.passes.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .last_sequence
            .store(frame.sequence, Ordering::Relaxed);
        if passes % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                passes,
                sequence = frame.sequence,
                recording = self.record.is_some(),
                "Render pass"
            );
        }

        let uniforms = QuadUniforms::for_frame(frame.transform);

        // Preview always before record
        if let Some(target) = self.preview.as_mut() {
            let ok = draw_target(&mut self.backend, target, &uniforms, TargetKind::Preview);
            self.counters.record_draw(TargetKind::Preview, ok);
        }
        if let Some(target) = self.record.as_mut() {
            let ok = draw_target(&mut self.backend, target, &uniforms, TargetKind::Record);
            self.counters.record_draw(TargetKind::Record, ok);
        }
    }

    fn attach_record_target(&mut self, surface: Option<SurfaceHandle>) {
        // Destroy strictly before creating the replacement
        if let Some(old) = self.record.take() {
            self.backend.destroy_target(old);
            info!("Record target detached");
        }

        let Some(surface) = surface else {
            return;
        };
        if !surface.is_valid() {
            warn!(surface = %surface.label(), "Ignoring invalid record surface");
            return;
        }

        let (width, height) = surface.size();
        match self.backend.create_target(surface) {
            Ok(target) => {
                info!(width, height, "Record target attached");
                self.record = Some(target);
            }
            Err(e) => {
                warn!(error = %e, "Failed to bind record surface");
            }
        }
    }

    /// Idempotent: runs on Shutdown and again from Drop
    fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.source.set_frame_signal(None);
        if let Some(target) = self.record.take() {
            self.backend.destroy_target(target);
        }
        if let Some(target) = self.preview.take() {
            self.backend.destroy_target(target);
        }
        self.backend.release();
        info!("Render worker released graphics resources");
    }
}

impl<B: RenderBackend> Drop for RenderState<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn draw_target<B: RenderBackend>(
    backend: &mut B,
    target: &mut B::Target,
    uniforms: &QuadUniforms,
    kind: TargetKind,
) -> bool {
    let result = backend
        .draw(target, uniforms)
        .and_then(|()| backend.present(target));
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(target = kind.label(), error = %e, "Render to target failed");
            false
        }
    }
}

/// Owner of the render worker
pub struct RenderEngine {
    worker: Option<TaskWorker<RenderTask>>,
    counters: Arc<RenderCounters>,
}

impl RenderEngine {
    /// Start the render worker
    ///
    /// `make_backend` runs on the worker and creates the graphics context and
    /// shader program. The preview target is then bound to `preview` and the
    /// worker starts listening to `source`. Any failure is returned here and
    /// leaves nothing running.
    pub fn start<B, F>(
        source: Arc<dyn FrameSource>,
        preview: SurfaceHandle,
        make_backend: F,
    ) -> Result<Self, RenderError>
    where
        B: RenderBackend + 'static,
        F: FnOnce() -> Result<B, RenderError> + Send + 'static,
    {
        let counters = Arc::new(RenderCounters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = TaskWorker::start(
            "render-worker",
            move |queue: Sender<RenderTask>| {
                let mut backend = make_backend()?;

                if !preview.is_valid() {
                    backend.release();
                    return Err(RenderError::InvalidSurface(format!(
                        "{} surface is not valid",
                        preview.label()
                    )));
                }
                let preview_target = match backend.create_target(preview) {
                    Ok(target) => target,
                    Err(e) => {
                        backend.release();
                        return Err(e);
                    }
                };

                let signal =
                    FrameSignal::new(move || queue.send(RenderTask::RenderFrame).is_ok());
                source.set_frame_signal(Some(signal.clone()));

                Ok(RenderState {
                    backend,
                    source,
                    signal,
                    preview: Some(preview_target),
                    record: None,
                    counters: worker_counters,
                    released: false,
                })
            },
            |state, task| state.handle(task),
        )
        .inspect_err(|e| error!(error = %e, "Render engine failed to start"))?;

        info!("Render engine started");
        Ok(Self {
            worker: Some(worker),
            counters,
        })
    }

    /// Stop the worker and release every GPU resource; idempotent
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            info!("Render engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_running())
    }

    /// Handle for attaching and detaching the record target
    pub fn binding(&self) -> Result<SurfaceBinding, RenderError> {
        self.worker
            .as_ref()
            .map(|w| SurfaceBinding::new(w.sender()))
            .ok_or(RenderError::WorkerUnavailable)
    }

    pub fn stats(&self) -> RenderStats {
        let c = &self.counters;
        RenderStats {
            passes: c.passes.load(Ordering::Relaxed),
            preview_draws: c.preview_draws.load(Ordering::Relaxed),
            record_draws: c.record_draws.load(Ordering::Relaxed),
            preview_failures: c.preview_failures.load(Ordering::Relaxed),
            record_failures: c.record_failures.load(Ordering::Relaxed),
            last_sequence: c.last_sequence.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn send(&self, task: RenderTask) -> bool {
        self.worker.as_ref().is_some_and(|w| w.send(task))
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
