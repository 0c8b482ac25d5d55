//! Agent configuration using Figment
//!
//! Configuration is assembled from, lowest to highest precedence:
//! 1. Built-in defaults (`AgentConfig::default()`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `CAMERA_AGENT_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CAMERA_AGENT_DISPATCH__OPERATION_TIMEOUT_MS=5000
//! CAMERA_AGENT_HANDLER__HISTORY_SIZE=64
//! CAMERA_AGENT_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use camera_agent::config::AgentConfig;
//!
//! let config = AgentConfig::load_from("config/camera_agent.toml")?;
//! println!("sync timeout: {:?}", config.dispatch.operation_timeout());
//! # Ok::<(), camera_agent::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CAMERA_AGENT_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Dispatch thread settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Camera handler thread settings
    #[serde(default)]
    pub handler: HandlerConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dispatch thread configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound a caller waits in a synchronous proxy call
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
    /// Number of jobs that may wait in the dispatch queue
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    /// Name of the dispatch OS thread
    #[serde(default = "default_dispatch_thread_name")]
    pub thread_name: String,
}

/// Camera handler thread configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Name of the handler OS thread
    #[serde(default = "default_handler_thread_name")]
    pub thread_name: String,
    /// Number of recent command tags kept for failure reports
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_operation_timeout() -> u64 {
    2500
}

fn default_max_queue_length() -> usize {
    256
}

fn default_dispatch_thread_name() -> String {
    "camera-dispatch".to_string()
}

fn default_handler_thread_name() -> String {
    "camera-handler".to_string()
}

fn default_history_size() -> usize {
    400
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout(),
            max_queue_length: default_max_queue_length(),
            thread_name: default_dispatch_thread_name(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            thread_name: default_handler_thread_name(),
            history_size: default_history_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DispatchConfig {
    /// The synchronous-call bound as a `Duration`.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl AgentConfig {
    /// Load defaults overridden by `CAMERA_AGENT_` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::defaults().merge(Self::env()))
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error: Figment treats it as an empty source,
    /// so the defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Self::defaults()
                .merge(Toml::file(path.as_ref()))
                .merge(Self::env()),
        )
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(AgentConfig::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Operation timeout, queue length and history size are non-zero
    /// - Thread names are not empty
    /// - Log level is valid (trace, debug, info, warn, error)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.max_queue_length == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_queue_length must be greater than 0".to_string(),
            ));
        }

        if self.handler.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "handler.history_size must be greater than 0".to_string(),
            ));
        }

        for (key, name) in [
            ("dispatch.thread_name", &self.dispatch.thread_name),
            ("handler.thread_name", &self.handler.thread_name),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot be empty",
                    key
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}
