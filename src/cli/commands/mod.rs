//! Subcommands module for sshkit CLI
//!
//! This module contains all the subcommand implementations.

pub mod exec;
pub mod run;
pub mod transfer;
pub mod tunnel;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use clap::Args;
use sshkit::config::Config;
use sshkit::connection::{exit_code, ClientConfig, ConnectionError};
use sshkit::subprocess::ProcessError;
use std::time::Duration;

/// Exit status reported for failures that happen before a remote status exists
pub const INFRASTRUCTURE_EXIT: i32 = 255;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Suppress per-line output and progress bars
    pub quiet: bool,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config,
            output: OutputFormatter::new(!cli.no_color, cli.verbosity()),
            quiet: cli.quiet,
        }
    }

    /// Resolve `target` against the configuration and apply command-line overrides
    pub fn client_config(&self, target: &str, overrides: &ConnectArgs) -> Result<ClientConfig> {
        let config = self.config.resolve_target(target)?;
        Ok(overrides.apply(config, self.quiet))
    }
}

/// Connection options shared by the SSH subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Private key path (or key text)
    #[arg(short = 'i', long = "identity")]
    pub identity: Option<String>,

    /// Proxy URL (http, https, socks5, socks5h)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Connection timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ConnectArgs {
    /// Layer these options over a resolved configuration
    pub fn apply(&self, mut config: ClientConfig, quiet: bool) -> ClientConfig {
        if let Some(identity) = &self.identity {
            config.private_key = identity.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        if let Some(secs) = self.timeout {
            config.timeout = Some(Duration::from_secs(secs));
        }
        if quiet {
            config.quiet = true;
        }
        config
    }
}

/// The negative sentinel for an error returned by a command.
pub fn sentinel(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<ConnectionError>() {
        return e.exit_code();
    }
    if let Some(e) = error.downcast_ref::<sshkit::Error>() {
        return e.exit_code();
    }
    match error.downcast_ref::<ProcessError>() {
        Some(ProcessError::Spawn { .. }) => exit_code::START_FAILED,
        Some(_) => exit_code::WAIT_FAILED,
        None => exit_code::CONNECT_FAILED,
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
