//! CLI module for sshkit
//!
//! This module provides the command-line interface for sshkit,
//! including argument parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sshkit - SSH commands, transfers and tunnels for operational tooling
#[derive(Parser, Debug, Clone)]
#[command(name = "sshkit")]
#[command(author = "sshkit Contributors")]
#[command(version)]
#[command(about = "Run commands, move files and open tunnels over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Do not echo remote output lines or draw progress bars
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "SSHKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command on a remote host
    Run(commands::run::RunArgs),

    /// Upload a local file over SFTP
    Upload(commands::transfer::UploadArgs),

    /// Download a remote file over SFTP
    Download(commands::transfer::DownloadArgs),

    /// Forward a local port through an SSH server
    Tunnel(commands::tunnel::TunnelArgs),

    /// Run a local command with a deadline
    Exec(commands::exec::ExecArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
