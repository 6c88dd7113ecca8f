// SPDX-License-Identifier: GPL-3.0-only

//! Surface binding controller
//!
//! Attach and detach never touch the graphics context from the caller's
//! thread. They are queued on the render worker behind any pass already
//! waiting there, so once the task has run every later pass sees the new
//! record target and none can reach a destroyed one.

use super::RenderTask;
use crate::backends::surface::SurfaceHandle;
use crate::errors::RenderError;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;
use tracing::{debug, warn};

/// Cloneable handle for changing the record target
#[derive(Clone)]
pub struct SurfaceBinding {
    queue: Sender<RenderTask>,
}

impl SurfaceBinding {
    pub(super) fn new(queue: Sender<RenderTask>) -> Self {
        Self { queue }
    }

    /// Replace the record target; `None` or an invalid surface leaves none bound
    pub fn attach_record_target(&self, surface: Option<SurfaceHandle>) -> Result<(), RenderError> {
        debug!(
            surface = surface.as_ref().map(|s| s.label()).unwrap_or("none"),
            "Queueing record target change"
        );
        self.queue
            .send(RenderTask::AttachRecordTarget(surface))
            .map_err(|_| RenderError::WorkerUnavailable)
    }

    /// Same as `attach_record_target(None)`
    pub fn detach_record_target(&self) -> Result<(), RenderError> {
        self.attach_record_target(None)
    }

    /// Wait until every task queued before this call has been handled
    pub fn flush(&self, timeout: Duration) -> Result<(), RenderError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.queue
            .send(RenderTask::Flush(ack_tx))
            .map_err(|_| RenderError::WorkerUnavailable)?;

        ack_rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => {
                warn!(?timeout, "Render worker did not drain its queue in time");
                RenderError::Draw("render worker flush timed out".to_string())
            }
            mpsc::RecvTimeoutError::Disconnected => RenderError::WorkerUnavailable,
        })
    }
}
