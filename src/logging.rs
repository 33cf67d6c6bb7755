//! Tracing subscriber setup.
//!
//! Two sinks:
//!
//! - stderr: diagnostic logs (human or JSON), filtered by `RUST_LOG` or the
//!   configured level. The operator transcript is excluded here because the console
//!   already printed it.
//! - operator log file (optional): only the `factory` target, i.e. exactly the lines
//!   the operator saw, timestamped.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::filter::{filter_fn, FilterExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ApplicationConfig;
use crate::console::TRANSCRIPT_TARGET;
use crate::error::FactoryResult;

/// Logging configuration, passed explicitly to [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines on stderr
    pub json: bool,
    /// Operator transcript file
    pub operator_log: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            operator_log: None,
        }
    }
}

impl From<&ApplicationConfig> for LogConfig {
    fn from(app: &ApplicationConfig) -> Self {
        Self {
            level: app.log_level.clone(),
            json: app.log_json,
            operator_log: app.operator_log.clone(),
        }
    }
}

fn is_transcript(meta: &Metadata<'_>) -> bool {
    meta.target() == TRANSCRIPT_TARGET
}

/// `RUST_LOG` if set and valid, otherwise `level`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Builds the subscriber without installing it.
///
/// Fails only if the operator log file cannot be created.
pub fn build(config: &LogConfig) -> FactoryResult<Box<dyn Subscriber + Send + Sync>> {
    let stderr_filter = env_filter(&config.level).and(filter_fn(|meta| !is_transcript(meta)));
    let stderr = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(stderr_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(stderr_filter)
            .boxed()
    };

    let transcript = match &config.operator_log {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_level(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter_fn(is_transcript)),
            )
        }
        None => None,
    };

    Ok(Box::new(
        tracing_subscriber::registry().with(stderr).with(transcript),
    ))
}

/// Installs the global subscriber. Call once at startup; a second call is a no-op.
pub fn init(config: &LogConfig) -> FactoryResult<()> {
    let subscriber = build(config)?;
    // Already set (e.g. by a test harness)
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;

    #[test]
    fn test_from_application_config() {
        let app = ApplicationConfig {
            log_level: "debug".to_string(),
            log_json: true,
            operator_log: Some(PathBuf::from("/tmp/operator.txt")),
            ..Default::default()
        };
        let config = LogConfig::from(&app);
        assert_eq!(config.level, "debug");
        assert!(config.json);
        assert_eq!(config.operator_log, app.operator_log);
    }

    #[test]
    fn test_transcript_file_gets_only_factory_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operator.txt");
        let config = LogConfig {
            operator_log: Some(path.clone()),
            ..Default::default()
        };

        let subscriber = build(&config).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            info!(target: TRANSCRIPT_TARGET, "PASS: led_white");
            info!("dispatcher started");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("PASS: led_white"));
        assert!(!contents.contains("dispatcher started"));
    }

    #[test]
    fn test_unwritable_operator_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            operator_log: Some(dir.path().join("missing").join("operator.txt")),
            ..Default::default()
        };
        assert!(build(&config).is_err());
    }
}
