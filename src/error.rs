//! Custom error types for the factory tool.
//!
//! This module defines the primary error type, `FactoryError`. Using the `thiserror`
//! crate, it gives the setup and reporting code a single error type to propagate with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps [`ConfigError`], covering both figment extraction failures and
//!   semantic validation of the loaded values.
//! - **`Io`**: Wraps `std::io::Error` (report files, operator log, terminal I/O).
//! - **`Serialization`**: JSON report encoding failures.
//! - **`Rpc`**: A device call returned a non-OK status where the caller cannot continue.
//! - **`ServiceNotFound`**: The connected device does not run the factory service.
//! - **`DeviceTimeout`**: The device did not answer a setup call in time.
//! - **`Subscription`**: The event stream could not be opened.
//!
//! Failures inside a single hardware test never surface as a `FactoryError`; they are
//! turned into failed subchecks by the test itself. Only setup and connection failures
//! reach the top level and abort the suite before any test runs.

use thiserror::Error;

use crate::config::ConfigError;
use crate::device::{Method, Status};

/// Convenience alias for results using the factory error type.
pub type FactoryResult<T> = std::result::Result<T, FactoryError>;

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RPC {method} failed with status {status}")]
    Rpc { method: Method, status: Status },

    #[error("No factory service exists on the connected device")]
    ServiceNotFound,

    #[error("Timed out waiting for device response to {method}")]
    DeviceTimeout { method: Method },

    #[error("Event subscription error: {0}")]
    Subscription(String),
}

impl FactoryError {
    /// Classifies a failed setup call by its status code.
    pub fn from_status(method: Method, status: Status) -> Self {
        match status {
            Status::NotFound => FactoryError::ServiceNotFound,
            Status::DeadlineExceeded => FactoryError::DeviceTimeout { method },
            status => FactoryError::Rpc { method, status },
        }
    }
}
