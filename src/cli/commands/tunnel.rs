//! Tunnel command - Forward a local port through an SSH server
//!
//! Either names a `[tunnels.<name>]` profile, or gives `--local` and
//! `--remote` with a target whose SSH server is the hop.

use super::{CommandContext, ConnectArgs, Runnable};
use anyhow::{bail, Result};
use clap::Parser;
use sshkit::connection::{Endpoint, SshClient, TunnelSpec};

/// Arguments for the tunnel command
#[derive(Parser, Debug, Clone)]
pub struct TunnelArgs {
    /// Tunnel profile name, or the hop target when --local/--remote are given
    pub name: String,

    /// Local listen address (host:port)
    #[arg(short = 'L', long, requires = "remote")]
    pub local: Option<Endpoint>,

    /// Destination reached from the hop (host:port)
    #[arg(short = 'R', long, requires = "local")]
    pub remote: Option<Endpoint>,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl TunnelArgs {
    /// Execute the tunnel command. Runs until the listener fails or the process is interrupted.
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let config = match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => {
                let config = ctx.client_config(&self.name, &self.connect)?;
                let spec = TunnelSpec::new(local.clone(), config.endpoint(), remote.clone());
                config.tunnel(spec)
            }
            (None, None) => {
                let config = ctx.config.tunnel_config(&self.name)?;
                self.connect.apply(config, ctx.quiet)
            }
            _ => bail!("--local and --remote must be given together"),
        };

        if let Some(spec) = &config.tunnel {
            ctx.output.info(&format!(
                "Forwarding {} to {} via {}",
                spec.local, spec.remote, spec.server
            ));
        }

        let client = SshClient::new(config);
        tokio::select! {
            result = client.start_tunnel() => result?,
            _ = tokio::signal::ctrl_c() => {
                ctx.output.info("Interrupted, closing tunnel");
            }
        }
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for TunnelArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
