//! Escalation of unexpected handler failures.
//!
//! Each agent owns one [`ExceptionPolicy`]: a callback and the executor it is
//! posted to. Until replaced through
//! [`CameraAgent::set_exception_callback`](crate::agent::CameraAgent::set_exception_callback),
//! the callback re-raises the error as a panic on the camera handler thread,
//! where it is logged and contained.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

use crate::error::AgentError;
use crate::looper::Executor;

/// Receives errors escalated from the camera handler.
pub type ExceptionCallback = Arc<dyn Fn(AgentError) + Send + Sync + 'static>;

/// The default callback: re-raise.
#[allow(clippy::panic)]
pub fn rethrow() -> ExceptionCallback {
    Arc::new(|err: AgentError| panic!("unhandled camera exception: {err}"))
}

struct Registration {
    callback: ExceptionCallback,
    executor: Arc<dyn Executor>,
}

/// Per-agent exception callback registration.
pub struct ExceptionPolicy {
    registration: Mutex<Registration>,
}

impl ExceptionPolicy {
    /// Policy that re-raises on `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            registration: Mutex::new(Registration {
                callback: rethrow(),
                executor,
            }),
        }
    }

    /// Replace the callback and the executor it runs on.
    pub fn set(&self, callback: ExceptionCallback, executor: Arc<dyn Executor>) {
        *self.registration.lock() = Registration { callback, executor };
    }

    /// Post `err` to the registered callback. Returns `false` if the executor
    /// rejected it.
    pub fn escalate(&self, err: AgentError) -> bool {
        let (callback, executor) = {
            let registration = self.registration.lock();
            (registration.callback.clone(), registration.executor.clone())
        };
        error!(error = %err, "escalating camera exception");
        let posted = executor.post(Box::new(move || callback(err)));
        if !posted {
            error!("exception executor has shut down; camera exception dropped");
        }
        posted
    }
}
