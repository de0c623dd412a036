//! Exec command - Run a local command through the subprocess runner

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use sshkit::subprocess::{SubProcess, SubProcessOptions, DEFAULT_TIMEOUT};
use std::time::Duration;

/// Arguments for the exec command
#[derive(Parser, Debug, Clone)]
pub struct ExecArgs {
    /// Shell commands, chained with `&&`
    #[arg(required = true)]
    pub commands: Vec<String>,

    /// Kill the process after this many seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Extra environment variables (KEY=VALUE)
    #[arg(short = 'e', long = "env", action = clap::ArgAction::Append)]
    pub env: Vec<String>,
}

impl ExecArgs {
    /// Execute the exec command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut options = SubProcessOptions::new()
            .with_quiet(ctx.quiet)
            .with_timeout(Duration::from_secs(self.timeout));

        for pair in &self.env {
            match pair.split_once('=') {
                Some((key, value)) => options = options.with_env(key, value),
                None => ctx
                    .output
                    .warning(&format!("Ignoring environment entry without '=': {}", pair)),
            }
        }

        let code = SubProcess::with_options(options).shell_exec(&self.commands).await?;
        Ok(code)
    }
}

#[async_trait::async_trait]
impl Runnable for ExecArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
