//! The dispatch thread: a single consumer that runs submitted jobs in
//! submission order.
//!
//! Every public camera operation becomes a job. A job typically waits for a
//! device state and then posts a command to the camera handler thread. After
//! each job the dispatcher waits until the handler has drained everything the
//! job posted, so the state gate of job N+1 observes the effects of job N.
//!
//! ```text
//!  caller ──run_job──▶ [ job queue ] ──▶ dispatch thread ──command──▶ handler thread
//!                                          │   ▲                          │
//!                                          │   └──── barrier unlock ──────┘
//!                                          └─ wait_for_states(mask)
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::DispatchConfig;
use crate::error::{AgentError, AgentResult};
use crate::handler::Mailbox;
use crate::looper::{run_contained, Executor, Task};

/// A unit of work run on the dispatch thread.
pub type Job = Task;

/// One-shot signal that lets a caller block until the handler thread reaches
/// a given point in its message stream.
///
/// The job posts [`unlock_task`](Self::unlock_task) to the handler after its
/// command; the caller waits on the bundle.
#[derive(Clone, Default)]
pub struct WaitDoneBundle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WaitDoneBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the bundle done and wake the waiter.
    pub fn signal(&self) {
        let (done, cond) = &*self.inner;
        *done.lock() = true;
        cond.notify_all();
    }

    /// A task that signals this bundle when run.
    pub fn unlock_task(&self) -> Task {
        let bundle = self.clone();
        Box::new(move || bundle.signal())
    }

    /// Block until signalled.
    pub fn wait(&self) {
        let (done, cond) = &*self.inner;
        let mut done = done.lock();
        while !*done {
            cond.wait(&mut done);
        }
    }

    /// Block until signalled or `timeout` elapses. Returns whether the bundle
    /// was signalled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (done, cond) = &*self.inner;
        let mut done = done.lock();
        if !*done {
            cond.wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }

    pub fn is_signalled(&self) -> bool {
        *self.inner.0.lock()
    }
}

struct JobQueue {
    jobs: VecDeque<Job>,
    ended: bool,
}

struct DispatchInner {
    queue: Mutex<JobQueue>,
    job_available: Condvar,
    max_queue_length: usize,
}

/// Single worker thread serializing every camera operation.
pub struct DispatchThread {
    inner: Arc<DispatchInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl DispatchThread {
    /// Start the worker thread. `handler` is the mailbox the per-job barrier
    /// waits on; it is told to quit once the worker has drained its queue.
    pub fn start(config: &DispatchConfig, handler: Mailbox) -> AgentResult<Self> {
        let inner = Arc::new(DispatchInner {
            queue: Mutex::new(JobQueue {
                jobs: VecDeque::new(),
                ended: false,
            }),
            job_available: Condvar::new(),
            max_queue_length: config.max_queue_length,
        });

        let worker_inner = inner.clone();
        let name = config.thread_name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&name, &worker_inner, &handler))?;
        let worker_id = worker.thread().id();

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// Queue `job` to run after every previously submitted job. Returns
    /// immediately.
    pub fn run_job(&self, job: Job) -> AgentResult<()> {
        let mut queue = self.inner.queue.lock();
        if queue.ended {
            return Err(AgentError::DispatcherEnded);
        }
        if queue.jobs.len() >= self.inner.max_queue_length {
            return Err(AgentError::QueueFull(queue.jobs.len()));
        }
        queue.jobs.push_back(job);
        self.inner.job_available.notify_one();
        Ok(())
    }

    /// Queue `job` and block until it signals `bundle` or `timeout` elapses.
    ///
    /// On timeout the job stays queued and still runs later.
    pub fn run_job_sync(
        &self,
        job: Job,
        bundle: &WaitDoneBundle,
        timeout: Duration,
        label: &str,
    ) -> AgentResult<()> {
        self.run_job(job)?;
        if bundle.wait_timeout(timeout) {
            Ok(())
        } else {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(label, timeout_ms, "timeout waiting for camera operation");
            Err(AgentError::OperationTimeout {
                label: label.to_string(),
                timeout_ms,
            })
        }
    }

    /// Number of jobs waiting to run.
    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.lock().jobs.len()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.queue.lock().ended
    }

    /// Stop accepting jobs. Jobs already queued still run, then the worker
    /// exits and tells the handler to quit. Does not wait.
    pub fn request_end(&self) {
        let mut queue = self.inner.queue.lock();
        if !queue.ended {
            debug!(pending = queue.jobs.len(), "ending dispatch thread");
        }
        queue.ended = true;
        self.inner.job_available.notify_all();
    }

    /// [`request_end`](Self::request_end), then wait for the worker to exit.
    ///
    /// Does not wait when called from a job on the worker itself. Calling it
    /// again is a no-op.
    pub fn end(&self) {
        self.request_end();
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("dispatch thread terminated abnormally");
            }
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.end();
    }
}

fn worker_loop(name: &str, inner: &DispatchInner, handler: &Mailbox) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.ended {
                    break None;
                }
                inner.job_available.wait(&mut queue);
            }
        };
        let Some(job) = job else { break };

        run_contained(name, job);

        let barrier = WaitDoneBundle::new();
        if handler.post(barrier.unlock_task()) {
            barrier.wait();
        }
    }

    handler.quit();
    debug!(thread = name, "dispatch thread exited");
}
