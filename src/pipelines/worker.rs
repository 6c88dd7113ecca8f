// SPDX-License-Identifier: GPL-3.0-only
//! Dedicated worker threads
//!
//! Two shapes of worker are used by the pipelines:
//!
//! - [`TaskWorker`] drains a FIFO task queue on its own thread. The render
//!   worker is one of these: frame notifications and attach/detach requests
//!   are tasks, executed strictly in arrival order.
//! - [`LoopController`] repeatedly calls a loop body until it asks to stop or
//!   a stop is requested. The encode worker's drain loop runs on one.
//!
//! Both run their initialization on the worker thread itself, so every
//! resource created there is owned (and dropped) by that thread. The
//! initialization result is handed back to the caller before `start`
//! returns, which lets a failed init be reported synchronously.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by a loop body or task handler to control the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep running
    Continue,
    /// Stop the worker gracefully
    Stop,
}

/// Task type that knows how to ask its worker to shut down
pub trait WorkerTask: Send + 'static {
    fn shutdown() -> Self;
}

/// Spawn a named thread, mapping spawn failure to a message
fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, String>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| format!("Failed to spawn {} thread: {}", name, e))
}

/// Wait for the init result sent back by a freshly spawned worker
fn await_init<R, E>(
    name: &str,
    init_rx: Receiver<Result<R, E>>,
    handle: JoinHandle<()>,
) -> Result<(R, JoinHandle<()>), Option<E>> {
    match init_rx.recv() {
        Ok(Ok(value)) => Ok((value, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(Some(e))
        }
        Err(_) => {
            // Init closure panicked before reporting
            warn!(name = %name, "Worker exited during initialization");
            let _ = handle.join();
            Err(None)
        }
    }
}

/// FIFO task queue served by a dedicated thread
pub struct TaskWorker<T: WorkerTask> {
    sender: Sender<T>,
    thread_handle: Option<JoinHandle<()>>,
    name: String,
}

impl<T: WorkerTask> TaskWorker<T> {
    /// Start the worker
    ///
    /// `init_fn` builds the worker-owned state on the new thread and receives
    /// a sender into the worker's own queue. If it fails the thread exits and
    /// the error is returned here. `handler` is then called once per task, in
    /// arrival order, until it returns `LoopAction::Stop` or every sender is
    /// gone. The state is dropped on the worker thread.
    pub fn start<S, E, I, H>(name: &str, init_fn: I, mut handler: H) -> Result<Self, E>
    where
        S: 'static,
        E: Send + 'static + From<String>,
        I: FnOnce(Sender<T>) -> Result<S, E> + Send + 'static,
        H: FnMut(&mut S, T) -> LoopAction + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<T>();
        let init_sender = sender.clone();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), E>>();
        let name_clone = name.to_string();

        info!(name = %name, "Starting task worker");

        let handle = spawn_named(name, move || {
            let mut state = match init_fn(init_sender) {
                Ok(state) => {
                    let _ = init_tx.send(Ok(()));
                    state
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(task) = receiver.recv() {
                if handler(&mut state, task) == LoopAction::Stop {
                    debug!(name = %name_clone, "Task handler requested stop");
                    break;
                }
            }

            drop(state);
            info!(name = %name_clone, "Task worker exiting");
        })?;

        match await_init(name, init_rx, handle) {
            Ok(((), handle)) => Ok(Self {
                sender,
                thread_handle: Some(handle),
                name: name.to_string(),
            }),
            Err(Some(e)) => Err(e),
            Err(None) => Err(E::from(format!("{} initialization panicked", name))),
        }
    }

    /// Enqueue a task; returns false if the worker has exited
    pub fn send(&self, task: T) -> bool {
        self.sender.send(task).is_ok()
    }

    /// Clone of the queue sender for producers on other threads
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Enqueue shutdown behind pending tasks and wait for the thread
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.sender.send(T::shutdown());
            debug!(name = %self.name, "Waiting for task worker to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Task worker thread panicked: {:?}", e);
            }
        }
    }
}

impl<T: WorkerTask> Drop for TaskWorker<T> {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "TaskWorker dropped, stopping");
            self.stop();
        }
    }
}

/// Controller for a polling loop running on its own thread
pub struct LoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    finished_rx: Receiver<()>,
    finished: bool,
    name: String,
}

impl LoopController {
    /// Start a loop with worker-side initialization
    ///
    /// `init_fn` returns the loop state plus a value handed back to the
    /// caller. The loop body runs until it returns `LoopAction::Stop` or
    /// [`request_stop`](Self::request_stop) is observed. The state is dropped
    /// on the worker after the loop exits.
    pub fn start_with_init<S, R, E, I, F>(
        name: &str,
        init_fn: I,
        mut loop_fn: F,
    ) -> Result<(Self, R), E>
    where
        S: 'static,
        R: Send + 'static,
        E: Send + 'static + From<String>,
        I: FnOnce() -> Result<(S, R), E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let (init_tx, init_rx) = mpsc::channel::<Result<R, E>>();
        let (finished_tx, finished_rx) = mpsc::channel::<()>();
        let name_clone = name.to_string();

        info!(name = %name, "Starting loop with initialization");

        let handle = spawn_named(name, move || {
            let mut state = match init_fn() {
                Ok((state, ret)) => {
                    let _ = init_tx.send(Ok(ret));
                    state
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                if loop_fn(&mut state) == LoopAction::Stop {
                    debug!(name = %name_clone, "Loop requested stop");
                    break;
                }
            }

            let _ = finished_tx.send(());
            drop(state);
            info!(name = %name_clone, "Loop thread exiting");
        })?;

        match await_init(name, init_rx, handle) {
            Ok((ret, handle)) => Ok((
                Self {
                    thread_handle: Some(handle),
                    stop_signal,
                    finished_rx,
                    finished: false,
                    name: name.to_string(),
                },
                ret,
            )),
            Err(Some(e)) => Err(e),
            Err(None) => Err(E::from(format!("{} initialization panicked", name))),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop at its next iteration (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the loop body to exit
    ///
    /// Returns true once the loop has left its body. Teardown of the loop
    /// state may still be running; use [`join`](Self::join) to wait for it.
    pub fn wait_finished(&mut self, timeout: Duration) -> bool {
        if self.finished {
            return true;
        }
        match self.finished_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Request stop and wait for the thread
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending a stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            }
            self.finished = true;
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "LoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    enum TestTask {
        Push(u32),
        Shutdown,
    }

    impl WorkerTask for TestTask {
        fn shutdown() -> Self {
            TestTask::Shutdown
        }
    }

    #[test]
    fn test_tasks_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut worker = TaskWorker::start(
            "test-tasks",
            |_| Ok::<_, String>(()),
            move |_, task| match task {
                TestTask::Push(n) => {
                    seen_clone.lock().unwrap().push(n);
                    LoopAction::Continue
                }
                TestTask::Shutdown => LoopAction::Stop,
            },
        )
        .unwrap();

        for n in 0..5 {
            assert!(worker.send(TestTask::Push(n)));
        }
        worker.stop();
        worker.stop();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(!worker.send(TestTask::Push(9)));
    }

    #[test]
    fn test_task_worker_init_failure() {
        let result = TaskWorker::<TestTask>::start(
            "test-tasks-fail",
            |_| Err::<(), _>("no device".to_string()),
            |_, _| LoopAction::Continue,
        );
        assert_eq!(result.err(), Some("no device".to_string()));
    }

    #[test]
    fn test_loop_returns_init_value() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let (mut controller, value) = LoopController::start_with_init(
            "test-loop",
            || Ok::<_, String>((0u32, 42u32)),
            move |state| {
                *state += 1;
                counter_clone.store(*state, Ordering::SeqCst);
                if *state >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        )
        .unwrap();

        assert_eq!(value, 42);
        assert!(controller.wait_finished(Duration::from_secs(5)));
        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_loop_init_failure_never_runs_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let result = LoopController::start_with_init(
            "test-fail-init",
            || Err::<((), ()), _>("Init failed".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_request_stop_ends_loop() {
        let (mut controller, ()) = LoopController::start_with_init(
            "test-stop",
            || Ok::<_, String>(((), ())),
            |_| {
                thread::sleep(Duration::from_millis(5));
                LoopAction::Continue
            },
        )
        .unwrap();

        assert!(!controller.wait_finished(Duration::from_millis(20)));
        controller.request_stop();
        assert!(controller.wait_finished(Duration::from_secs(5)));
        controller.stop();
        assert!(!controller.is_running());
    }
}
