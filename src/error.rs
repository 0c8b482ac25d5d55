//! Custom error types for the camera agent.
//!
//! This module defines the primary error type, `AgentError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! describe the failures that can occur while commands flow from a caller,
//! through the dispatch thread, to the device.
//!
//! ## Error Hierarchy
//!
//! - **Precondition errors** (`DeviceAlreadyOpen`, `DeviceNotOpen`, `InvalidCommand`):
//!   programmer errors. They are never retried.
//! - **Device-operation failures** (`DeviceOpenFailure`, `ReconnectionFailure`):
//!   reported to the caller through its open callback, never raised.
//! - **Unexpected runtime failures** (`Device`): raised by the collaborator while the
//!   handler thread executes a command. The exception policy force-releases the
//!   device and escalates the error to the registered exception callback.
//! - **Dispatch errors** (`OperationTimeout`, `DispatcherEnded`, `QueueFull`):
//!   returned synchronously to the submitting context.
//! - **`Config`** / **`Io`**: configuration loading and worker thread creation.

use thiserror::Error;

use crate::config::ConfigError;
use crate::device::CameraId;

/// Convenience alias for results using the agent error type.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Camera {camera_id} is already open ({history})")]
    DeviceAlreadyOpen { camera_id: CameraId, history: String },

    #[error("No camera device is open")]
    DeviceNotOpen,

    #[error("Invalid camera command: {0}")]
    InvalidCommand(String),

    #[error("Failed to open camera {camera_id} ({info})")]
    DeviceOpenFailure { camera_id: CameraId, info: String },

    #[error("Camera reconnection failed ({info})")]
    ReconnectionFailure { info: String },

    #[error("Camera device error during {operation}: {source}")]
    Device {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Timeout waiting {timeout_ms}ms for {label}")]
    OperationTimeout { label: String, timeout_ms: u64 },

    #[error("Dispatch thread has ended and no longer accepts jobs")]
    DispatcherEnded,

    #[error("Dispatch job queue is full ({0} pending jobs)")]
    QueueFull(usize),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Wraps a collaborator failure raised during `operation`.
    pub fn device(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Device { operation, source }
    }
}
