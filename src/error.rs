//! Error types for sshkit.
//!
//! Each subsystem has its own error enum ([`ConnectionError`],
//! [`ProcessError`]); this module aggregates them for callers that drive
//! several subsystems, such as the CLI.

use thiserror::Error;

use crate::connection::{exit_code, ConnectionError};
use crate::subprocess::ProcessError;

/// Result type alias for sshkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for sshkit.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH connection, command, transfer or tunnel failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Local subprocess failure.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Configuration file or profile problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The negative sentinel describing where the failure happened.
    ///
    /// Uses the same classes as [`ConnectionError::exit_code`].
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Connection(e) => e.exit_code(),
            Error::Process(ProcessError::Spawn { .. }) => exit_code::START_FAILED,
            Error::Process(_) => exit_code::WAIT_FAILED,
            Error::Config(_) | Error::Io(_) => exit_code::CONNECT_FAILED,
        }
    }
}
