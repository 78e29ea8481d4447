//! Custom error types for the application.
//!
//! This module defines the primary error type, `RigError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the kinds of failures a measurement run can hit.
//!
//! ## Error taxonomy
//!
//! - **`Config`**: wraps errors from the `config` crate, typically file
//!   parsing or format issues in the rig description.
//! - **`Configuration`**: semantic errors in operator parameters that parse
//!   fine but are logically invalid (step count below 2, negative settle
//!   delay). Caught by the parameter forms before any instrument is opened.
//! - **`Connection`**: a VISA resource could not be reserved.
//! - **`Command`**: an instrument rejected or failed a configuration or
//!   stimulus command.
//! - **`Read`**: a reading query timed out or returned a malformed reply.
//! - **`Storage`** / **`Log`**: run-log file I/O.
//! - **`Aborted`**: the operator requested a stop; a clean exit, not a fault.
//! - **`ShutdownFailed`**: one or more instruments could not be driven to
//!   safe idle. Carries every individual failure so no instrument's error
//!   hides another's.
//!
//! None of these are retried; everything except `Aborted` terminates the run
//! and invokes the shutdown handler.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid parameters: {0}")]
    Configuration(String),

    #[error("Connection error: failed to open '{resource}'")]
    Connection {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Instrument command failed: {0:#}")]
    Command(#[source] anyhow::Error),

    #[error("Read error: {0:#}")]
    Read(#[source] anyhow::Error),

    #[error("Run log I/O error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Run log write error: {0}")]
    Log(#[from] csv::Error),

    #[error("Run aborted by operator")]
    Aborted,

    #[error("Feature '{0}' is not enabled. Rebuild with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown finished with errors: {}", format_shutdown_errors(.0))]
    ShutdownFailed(Vec<RigError>),
}

fn format_shutdown_errors(errors: &[RigError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RigError {
    /// Collapse a list of parameter-form violations into one error.
    pub fn invalid_parameters(violations: Vec<String>) -> Self {
        RigError::Configuration(violations.join("; "))
    }
}
