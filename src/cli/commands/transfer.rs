//! Upload and download commands - SFTP file transfers

use super::{CommandContext, ConnectArgs, Runnable};
use anyhow::Result;
use clap::Parser;
use sshkit::connection::SshClient;
use std::path::PathBuf;

/// Arguments for the upload command
#[derive(Parser, Debug, Clone)]
pub struct UploadArgs {
    /// Host profile name or [user@]host[:port]
    pub target: String,

    /// Local source file
    pub local: PathBuf,

    /// Remote destination path
    pub remote: String,

    /// Transfer chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl UploadArgs {
    /// Execute the upload command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.client_config(&self.target, &self.connect)?;
        if let Some(chunk_size) = self.chunk_size {
            config = config.chunk_size(chunk_size);
        }

        let client = SshClient::new(config);
        let result = client.upload(&self.local, &self.remote).await;
        client.close().await?;

        let bytes = result?;
        ctx.output.info(&format!(
            "Uploaded {} to {} ({} bytes)",
            self.local.display(),
            self.remote,
            bytes
        ));
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for UploadArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

/// Arguments for the download command
#[derive(Parser, Debug, Clone)]
pub struct DownloadArgs {
    /// Host profile name or [user@]host[:port]
    pub target: String,

    /// Remote source path
    pub remote: String,

    /// Local destination file (its directory must exist)
    pub local: PathBuf,

    /// Transfer chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl DownloadArgs {
    /// Execute the download command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.client_config(&self.target, &self.connect)?;
        if let Some(chunk_size) = self.chunk_size {
            config = config.chunk_size(chunk_size);
        }

        let client = SshClient::new(config);
        let result = client.download(&self.remote, &self.local).await;
        client.close().await?;

        let bytes = result?;
        ctx.output.info(&format!(
            "Downloaded {} to {} ({} bytes)",
            self.remote,
            self.local.display(),
            bytes
        ));
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for DownloadArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
