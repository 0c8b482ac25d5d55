//! Redelivery of results onto the caller's execution context.

use std::fmt;
use std::sync::Arc;

use crate::looper::Executor;
use crate::proxy::CameraProxy;

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A caller callback bound to the executor it must run on.
///
/// Built per request and consumed by [`forward`](Self::forward), so it fires
/// at most once. When either the executor or the callback is missing the
/// forwarder is a no-op sentinel and forwarding discards the value.
pub struct CallbackForward<T> {
    target: Option<(Arc<dyn Executor>, Callback<T>)>,
}

impl<T: Send + 'static> CallbackForward<T> {
    pub fn new(executor: Option<Arc<dyn Executor>>, callback: Option<Callback<T>>) -> Self {
        match (executor, callback) {
            (Some(executor), Some(callback)) => Self {
                target: Some((executor, callback)),
            },
            _ => Self::noop(),
        }
    }

    /// Forward to `callback` on `executor`.
    pub fn to<F>(executor: Arc<dyn Executor>, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self::new(Some(executor), Some(Box::new(callback)))
    }

    /// Forward to a callback that also receives the proxy the request was
    /// made through.
    pub fn with_proxy<F>(
        executor: Option<Arc<dyn Executor>>,
        proxy: &CameraProxy,
        callback: F,
    ) -> Self
    where
        F: FnOnce(T, CameraProxy) + Send + 'static,
    {
        let proxy = proxy.clone();
        Self::new(executor, Some(Box::new(move |value| callback(value, proxy))))
    }

    /// Forwarder that drops whatever it is given.
    pub fn noop() -> Self {
        Self { target: None }
    }

    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }

    /// Post `value` to the callback on its executor. Never calls the callback
    /// on the current thread.
    ///
    /// Returns `false` if this is a no-op or the executor has shut down.
    pub fn forward(self, value: T) -> bool {
        match self.target {
            Some((executor, callback)) => executor.post(Box::new(move || callback(value))),
            None => false,
        }
    }
}

impl<T: Send + 'static> Default for CallbackForward<T> {
    fn default() -> Self {
        Self::noop()
    }
}

impl<T> fmt::Debug for CallbackForward<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackForward")
            .field("noop", &self.target.is_none())
            .finish()
    }
}
