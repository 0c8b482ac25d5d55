//! The camera agent.
//!
//! A [`CameraAgent`] owns the two worker threads (dispatch and handler) for
//! one camera at a time. Opening a camera hands back a
//! [`CameraProxy`](crate::proxy::CameraProxy) on the caller's executor; all
//! later operations go through the proxy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::{mpsc, Arc};
//! use camera_agent::agent::CameraAgent;
//! use camera_agent::config::AgentConfig;
//! use camera_agent::device::mock::MockCameraDriver;
//! use camera_agent::looper::{Executor, Looper};
//!
//! let agent = CameraAgent::new(Arc::new(MockCameraDriver::new()), &AgentConfig::default())?;
//! let callbacks: Arc<dyn Executor> = Arc::new(Looper::spawn("callbacks")?);
//!
//! let (tx, rx) = mpsc::channel();
//! agent.open_camera(Some(callbacks), 0, move |result| {
//!     let _ = tx.send(result);
//! })?;
//! let proxy = rx.recv().expect("open callback")?;
//! proxy.start_preview()?;
//!
//! agent.recycle();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::command::{Command, OpenResult};
use crate::config::AgentConfig;
use crate::device::{CameraDeviceInfo, CameraDriver, CameraId, CameraSettings};
use crate::dispatch::{DispatchThread, WaitDoneBundle};
use crate::error::AgentResult;
use crate::exception::{ExceptionCallback, ExceptionPolicy};
use crate::forward::CallbackForward;
use crate::handler::{CameraHandler, Mailbox};
use crate::looper::Executor;
use crate::state::{CameraState, StateHolder, StateMask};

/// Everything the agent, its proxies and the handler thread share.
pub(crate) struct AgentContext {
    pub(crate) dispatch: DispatchThread,
    pub(crate) mailbox: Mailbox,
    pub(crate) state: Arc<StateHolder>,
    pub(crate) exception: ExceptionPolicy,
    /// Last parameter snapshot read by the handler
    pub(crate) parameters: Mutex<Option<CameraSettings>>,
    pub(crate) operation_timeout: Duration,
}

impl AgentContext {
    pub(crate) fn new(config: &AgentConfig, mailbox: Mailbox) -> AgentResult<Arc<Self>> {
        let dispatch = DispatchThread::start(&config.dispatch, mailbox.clone())?;
        Ok(Arc::new(Self {
            dispatch,
            exception: ExceptionPolicy::new(Arc::new(mailbox.clone())),
            mailbox,
            state: Arc::new(StateHolder::default()),
            parameters: Mutex::new(None),
            operation_timeout: config.dispatch.operation_timeout(),
        }))
    }

    /// Queue a job that posts `command` to the handler.
    pub(crate) fn post_command(&self, command: Command) -> AgentResult<()> {
        let mailbox = self.mailbox.clone();
        self.dispatch.run_job(Box::new(move || {
            mailbox.send(command);
        }))
    }

    /// Queue a job that waits for a state in `mask`, then posts `command`.
    pub(crate) fn post_command_when(&self, mask: StateMask, command: Command) -> AgentResult<()> {
        let mailbox = self.mailbox.clone();
        let state = self.state.clone();
        self.dispatch.run_job(Box::new(move || {
            if state.wait_for_states(mask).is_some() {
                mailbox.send(command);
            } else {
                debug!(command = %command.tag(), "camera torn down; dropping gated command");
            }
        }))
    }

    /// Post `command` and block until the handler has run it, or until the
    /// operation timeout elapses.
    pub(crate) fn post_command_sync(&self, command: Command, label: &str) -> AgentResult<()> {
        let bundle = WaitDoneBundle::new();
        let mailbox = self.mailbox.clone();
        let unlock = bundle.unlock_task();
        self.dispatch.run_job_sync(
            Box::new(move || {
                mailbox.send(command);
                mailbox.post(unlock);
            }),
            &bundle,
            self.operation_timeout,
            label,
        )
    }
}

/// Serializes all access to one camera device.
pub struct CameraAgent {
    context: Arc<AgentContext>,
    driver: Arc<dyn CameraDriver>,
    handler_thread: Mutex<Option<JoinHandle<()>>>,
    handler_thread_id: ThreadId,
}

impl CameraAgent {
    /// Start the dispatch and handler threads.
    pub fn new(driver: Arc<dyn CameraDriver>, config: &AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        let (mailbox, receiver) = Mailbox::channel();
        let context = AgentContext::new(config, mailbox)?;
        let handler =
            CameraHandler::new(driver.clone(), context.clone(), config.handler.history_size);
        let handler_thread = receiver.spawn(&config.handler.thread_name, handler)?;
        let handler_thread_id = handler_thread.thread().id();

        info!(
            dispatch_thread = %config.dispatch.thread_name,
            handler_thread = %config.handler.thread_name,
            "camera agent started"
        );
        Ok(Self {
            context,
            driver,
            handler_thread: Mutex::new(Some(handler_thread)),
            handler_thread_id,
        })
    }

    /// Open `camera_id`. The outcome is delivered to `callback` on `executor`;
    /// without an executor the outcome is discarded.
    pub fn open_camera<F>(
        &self,
        executor: Option<Arc<dyn Executor>>,
        camera_id: CameraId,
        callback: F,
    ) -> AgentResult<()>
    where
        F: FnOnce(OpenResult) + Send + 'static,
    {
        self.context.post_command(Command::Open {
            camera_id,
            callback: CallbackForward::new(executor, Some(Box::new(callback))),
        })
    }

    /// Release the open camera.
    ///
    /// With `synced` the call blocks until the release has run or the
    /// operation timeout elapses.
    pub fn close_camera(&self, synced: bool) -> AgentResult<()> {
        if synced {
            self.context.post_command_sync(Command::Release, "camera release")
        } else {
            self.context.post_command(Command::Release)
        }
    }

    /// Replace the callback unexpected handler failures are escalated to.
    pub fn set_exception_callback(&self, callback: ExceptionCallback, executor: Arc<dyn Executor>) {
        self.context.exception.set(callback, executor);
    }

    /// Close the camera and stop both worker threads. Later calls are no-ops;
    /// later submissions fail with `DispatcherEnded`.
    ///
    /// Jobs still waiting for a camera state are dropped. Called from the
    /// handler thread (a task on [`handler_executor`](Self::handler_executor)),
    /// the release is queued and the threads wind down after the task
    /// returns.
    pub fn recycle(&self) {
        if self.context.dispatch.is_ended() {
            return;
        }
        if thread::current().id() == self.handler_thread_id {
            self.recycle_from_handler();
            return;
        }

        if let Err(e) = self.close_camera(true) {
            warn!(error = %e, "camera release during recycle did not complete");
        }
        // The release above may be queued behind a job gated on a state that
        // will never come.
        self.context.state.invalidate();
        self.context.dispatch.end();

        let handler = self.handler_thread.lock().take();
        if let Some(handler) = handler {
            if handler.join().is_err() {
                error!("camera handler thread terminated abnormally");
            }
        }
        info!("camera agent recycled");
    }

    /// The dispatcher waits on this thread after every job, so nothing here
    /// may block on the dispatcher.
    fn recycle_from_handler(&self) {
        if let Err(e) = self.close_camera(false) {
            warn!(error = %e, "could not queue camera release during recycle");
        }
        self.context.state.invalidate();
        self.context.dispatch.request_end();
        // Detach: the thread exits once the dispatcher tells it to quit.
        drop(self.handler_thread.lock().take());
        info!("camera agent recycling from the handler thread");
    }

    /// Enumerate cameras. `None` if the driver cannot.
    pub fn camera_device_info(&self) -> Option<CameraDeviceInfo> {
        match self.driver.device_info() {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "could not enumerate cameras");
                None
            }
        }
    }

    /// Current camera state. Advisory: may change as soon as it is read.
    pub fn state(&self) -> CameraState {
        self.context.state.state()
    }

    /// The handler thread as an executor, ordered with camera commands.
    pub fn handler_executor(&self) -> Arc<dyn Executor> {
        Arc::new(self.context.mailbox.clone())
    }
}

impl Drop for CameraAgent {
    fn drop(&mut self) {
        self.recycle();
    }
}
