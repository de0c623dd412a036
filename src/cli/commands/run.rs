//! Run command - Execute a command on a remote host
//!
//! The process exits with the remote command's status.

use super::{CommandContext, ConnectArgs, Runnable};
use anyhow::Result;
use clap::Parser;
use sshkit::connection::SshClient;
use std::time::Duration;

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Host profile name or [user@]host[:port]
    pub target: String,

    /// Command to run (joined with spaces and passed to the remote shell)
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Request a pseudo-terminal
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Kill the command after this many seconds
    #[arg(long)]
    pub command_timeout: Option<u64>,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.client_config(&self.target, &self.connect)?;
        if self.tty {
            config.tty = true;
        }
        if let Some(secs) = self.command_timeout {
            config.command_timeout = Some(Duration::from_secs(secs));
        }

        let command = self.command.join(" ");
        ctx.output
            .info(&format!("Running '{}' on {}@{}", command, config.user, config.endpoint()));

        let client = SshClient::new(config);
        let result = client.run(&command).await;
        client.close().await?;

        Ok(result?)
    }
}

#[async_trait::async_trait]
impl Runnable for RunArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
