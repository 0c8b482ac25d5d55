//! Tracing initialization.
//!
//! `RUST_LOG` takes precedence when set; otherwise the level from
//! [`LoggingConfig`](crate::config::LoggingConfig) applies to this crate and
//! everything else logs at `warn`.

use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;

/// Build the filter used by [`init`].
pub fn env_filter(config: &AgentConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,camera_agent={}", config.logging.level))
    })
}

/// Install a global `fmt` subscriber, JSON-formatted if configured.
///
/// Returns `false` when a global subscriber was already installed, which is
/// the normal case when embedding the agent in a larger program.
pub fn init(config: &AgentConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_thread_names(true);
    if config.logging.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_uses_configured_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let mut config = AgentConfig::default();
        config.logging.level = "trace".to_string();
        assert!(env_filter(&config).to_string().contains("camera_agent=trace"));
    }
}
