//! Core library for the camera agent.
//!
//! Serializes every operation on a single-owner camera device through one
//! dispatch thread, gates operations on the device state, and delivers
//! results back on executors chosen by the caller. Entry point is
//! [`agent::CameraAgent`]; device access goes through the
//! [`device::CameraDriver`] trait.

pub mod agent;
pub mod command;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod forward;
pub mod handler;
pub mod logging;
pub mod looper;
pub mod proxy;
pub mod state;

pub use agent::CameraAgent;
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use proxy::{CameraProxy, PictureCallbacks};
pub use state::{CameraState, StateMask};
