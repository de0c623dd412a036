//! SSH connection layer.
//!
//! This module provides an SSH client for running remote commands and moving
//! files, plus a local-to-remote TCP tunnel that hops through an SSH server.
//!
//! # Overview
//!
//! - [`SshClient`] connects lazily (once) with a private key, optionally through
//!   an HTTP(S) or SOCKS5 proxy, and exposes [`run`](SshClient::run),
//!   [`upload`](SshClient::upload) and [`download`](SshClient::download).
//! - [`Tunnel`] listens on a local endpoint and relays every accepted connection
//!   through its own SSH connection to a remote endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use sshkit::connection::{ClientConfig, SshClient};
//!
//! let config = ClientConfig::new("10.0.0.5", 22, "root", "~/.ssh/id_ed25519")
//!     .proxy("socks5h://127.0.0.1:1080")
//!     .timeout(std::time::Duration::from_secs(10));
//! let client = SshClient::new(config);
//!
//! let exit_code = client.run("uname -a").await?;
//! client.upload("./build.tar.gz", "/tmp/build.tar.gz").await?;
//! client.close().await?;
//! ```

/// Client configuration and private key loading.
pub mod config;

/// `host:port` endpoints.
pub mod endpoint;

/// Remote command output handling.
pub mod exec;

/// Raw stream dialing, direct or through a proxy.
pub mod proxy;

/// SSH client built on russh.
pub mod russh;

/// Connect-once state holder.
pub mod slot;

/// Chunked file copy and progress reporting.
pub mod transfer;

/// Local listener that forwards through an SSH hop.
pub mod tunnel;

use std::time::Duration;
use thiserror::Error;

pub use self::config::{load_private_key, ClientConfig, LineHandler, DEFAULT_CHUNK_SIZE};
pub use self::endpoint::Endpoint;
pub use self::proxy::{ProxyScheme, ProxyUrl};
pub use self::russh::SshClient;
pub use self::slot::ConnectionSlot;
pub use self::transfer::{ProgressCallback, TransferDirection, TransferPhase, TransferProgress};
pub use self::tunnel::{ForwardDialer, ForwardStage, SshForwardDialer, Tunnel, TunnelSpec};

/// Exit code sentinels for failures that happen before a remote exit status exists.
///
/// Remote exit statuses are never negative, so these cannot collide with a
/// command that ran and exited.
pub mod exit_code {
    /// Connection, authentication or configuration failure.
    pub const CONNECT_FAILED: i32 = -1;
    /// Session channel or PTY could not be set up.
    pub const SESSION_FAILED: i32 = -2;
    /// The command could not be started.
    pub const START_FAILED: i32 = -3;
    /// The session ended without a usable exit status.
    pub const WAIT_FAILED: i32 = -4;
    /// A file transfer failed after the connection was up.
    pub const TRANSFER_FAILED: i32 = -5;
    /// The tunnel listener could not bind or accept, or a forward failed.
    pub const TUNNEL_FAILED: i32 = -6;
}

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Private key is missing, unreadable, or cannot be parsed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Dial, proxy, handshake, or authentication against the server failed.
    #[error("Unable to connect {addr}: {message}")]
    Connect {
        /// Target `host:port`
        addr: String,
        /// Underlying cause
        message: String,
    },

    /// The server rejected the pseudo-terminal request.
    #[error("Failed to set tty ({addr}): {message}")]
    Tty {
        /// Target `host:port`
        addr: String,
        /// Underlying cause
        message: String,
    },

    /// A session or SFTP sub-channel could not be opened.
    #[error("Failed to open session: {0}")]
    Session(String),

    /// The remote command could not be started.
    #[error("Failed to start command: {0}")]
    Start(String),

    /// The session ended before an exit status was received.
    #[error("Command did not report an exit status: {0}")]
    Wait(String),

    /// The command deadline elapsed.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Writing remote output to the caller's sink failed.
    #[error("Failed to write command output: {0}")]
    Sink(#[source] std::io::Error),

    /// A read or write failed while copying a file.
    #[error("{direction} failed at byte {offset}: {message}")]
    Transfer {
        /// Which way the file was moving
        direction: TransferDirection,
        /// Bytes successfully copied before the failure
        offset: u64,
        /// Underlying cause
        message: String,
    },

    /// The tunnel listener could not bind its local address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Local `host:port`
        addr: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The tunnel listener failed while accepting connections.
    #[error("Failed to accept on {addr}: {source}")]
    Accept {
        /// Local `host:port`
        addr: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// A single forwarded connection could not reach its destination.
    #[error("Forward failed at {stage} ({addr}): {message}")]
    Forward {
        /// Which dial failed
        stage: ForwardStage,
        /// The endpoint being dialed
        addr: String,
        /// Underlying cause
        message: String,
    },

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConnectionError {
    pub(crate) fn connect(addr: impl Into<String>, message: impl ToString) -> Self {
        ConnectionError::Connect {
            addr: addr.into(),
            message: message.to_string(),
        }
    }

    /// The sentinel a command-style caller should report for this error.
    ///
    /// See [`exit_code`] for the meaning of each value.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConnectionError::Auth(_)
            | ConnectionError::Connect { .. }
            | ConnectionError::InvalidConfig(_) => exit_code::CONNECT_FAILED,
            ConnectionError::Session(_) | ConnectionError::Tty { .. } => {
                exit_code::SESSION_FAILED
            }
            ConnectionError::Start(_) => exit_code::START_FAILED,
            ConnectionError::Wait(_) | ConnectionError::Timeout(_) | ConnectionError::Sink(_) => {
                exit_code::WAIT_FAILED
            }
            ConnectionError::Transfer { .. } => exit_code::TRANSFER_FAILED,
            ConnectionError::Bind { .. }
            | ConnectionError::Accept { .. }
            | ConnectionError::Forward { .. } => exit_code::TUNNEL_FAILED,
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
