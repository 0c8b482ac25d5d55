//! Execution contexts that callbacks are posted onto.
//!
//! An [`Executor`] accepts boxed closures and runs them somewhere else: on a
//! dedicated [`Looper`] thread, on a tokio runtime, or on the camera handler
//! thread itself. Callers of the camera API choose the executor their results
//! are delivered on.

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A unit of work posted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs posted tasks on its own execution context.
pub trait Executor: Send + Sync {
    /// Queue `task` for execution. Returns `false` if the context has shut
    /// down and the task was dropped.
    fn post(&self, task: Task) -> bool;
}

/// Posts each task onto the runtime as its own tokio task.
///
/// Tasks posted this way are not ordered relative to one another.
impl Executor for tokio::runtime::Handle {
    fn post(&self, task: Task) -> bool {
        self.spawn(async move { task() });
        true
    }
}

enum LooperMessage {
    Run(Task),
    Quit,
}

/// A named OS thread that runs posted tasks one at a time, in posting order.
///
/// A task that panics is logged and discarded; the looper keeps running.
pub struct Looper {
    name: String,
    sender: mpsc::UnboundedSender<LooperMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Looper {
    /// Spawn a new looper thread.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let loop_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(message) = receiver.blocking_recv() {
                match message {
                    LooperMessage::Run(task) => run_contained(&loop_name, task),
                    LooperMessage::Quit => break,
                }
            }
            debug!(looper = %loop_name, "looper exited");
        })?;
        let thread_id = handle.thread().id();

        Ok(Self {
            name,
            sender,
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from this looper's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop after every task posted so far has run.
    ///
    /// Blocks until the thread exits unless called from the looper itself.
    pub fn quit_safely(&self) {
        let _ = self.sender.send(LooperMessage::Quit);
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!(looper = %self.name, "looper thread terminated abnormally");
            }
        }
    }
}

impl Executor for Looper {
    fn post(&self, task: Task) -> bool {
        self.sender.send(LooperMessage::Run(task)).is_ok()
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.quit_safely();
    }
}

/// Run `task`, logging instead of unwinding if it panics.
pub(crate) fn run_contained(context: &str, task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        error!(
            context,
            panic = %panic_message(payload.as_ref()),
            "task panicked"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
