//! # sshkit - SSH commands, transfers and tunnels
//!
//! sshkit wraps an SSH connection to one remote host behind a small async
//! API for operational tooling:
//!
//! - **Run**: execute a remote command, streaming its output line by line
//!   and returning the exit status
//! - **Transfer**: upload and download single files over SFTP with
//!   progress reporting
//! - **Tunnel**: forward a local TCP port through an SSH server to a
//!   remote destination
//! - **Subprocess**: run local commands with merged output and a deadline
//!
//! The connection is opened lazily on first use, authenticates with a
//! private key, and may be routed through an HTTP, HTTPS or SOCKS5 proxy.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CLI Interface                         │
//! │        (clap subcommands: run, upload, download, ...)        │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!              ┌────────────────┼─────────────────┐
//!              ▼                ▼                 ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │    SshClient     │ │      Tunnel      │ │    SubProcess    │
//! │ (run + SFTP over │ │ (local listener, │ │ (local commands) │
//! │  one session)    │ │  per-conn hops)  │ │                  │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!              │                │
//!              └────────┬───────┘
//!                       ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              Proxy dialer (direct, HTTP(S), SOCKS5)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sshkit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> sshkit::Result<()> {
//!     let config = ClientConfig::new("10.0.0.5", 22, "deploy", "~/.ssh/id_ed25519")
//!         .on_line(|line| println!("remote: {}", line));
//!     let client = SshClient::new(config);
//!
//!     let code = client.run("uname -a").await?;
//!     client.upload("./app.tar.gz", "/tmp/app.tar.gz").await?;
//!     client.close().await?;
//!     std::process::exit(code);
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::Config;
    pub use crate::connection::{
        ClientConfig, ConnectionError, ConnectionResult, Endpoint, SshClient, TransferProgress,
        Tunnel, TunnelSpec,
    };
    pub use crate::error::{Error, Result};
    pub use crate::subprocess::{SubProcess, SubProcessOptions};
}

/// Error types and result aliases for sshkit operations.
pub mod error;

/// File-based configuration: defaults, host profiles and tunnel profiles.
pub mod config;

/// SSH connection, command execution, SFTP transfers, proxies and tunnels.
pub mod connection;

/// Local subprocess runner.
pub mod subprocess;

pub use error::{Error, Result};
