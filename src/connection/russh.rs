//! Russh connection module
//!
//! This module provides the SSH client on top of the russh crate: lazy
//! connect with private-key authentication, remote command execution, and
//! SFTP transfers.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::{KeyPair, PublicKey};
use russh::{ChannelMsg, Disconnect, Pty};
use russh_sftp::client::SftpSession;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::RwLockReadGuard;
use tracing::{debug, info, trace, warn};

use super::config::{load_private_key, ClientConfig};
use super::endpoint::Endpoint;
use super::exec::{OutputPump, PumpState};
use super::proxy::{self, ProxyUrl};
use super::slot::ConnectionSlot;
use super::transfer::{copy_chunked, ProgressReporter, TransferDirection, TransferProgress};
use super::tunnel::{SshForwardDialer, Tunnel};
use super::{ConnectionError, ConnectionResult};

/// Terminal modes sent with a PTY request
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Client handler for russh.
///
/// Every server host key is accepted. There is no known_hosts pinning, so the
/// first hop is open to interception; the fingerprint is logged for auditing.
pub struct ClientHandler {
    addr: String,
}

impl ClientHandler {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(host = %self.addr, "Accepting server host key without verification");
        debug!(
            host = %self.addr,
            algorithm = %server_public_key.name(),
            fingerprint = %server_public_key.fingerprint(),
            "Server host key"
        );
        Ok(true)
    }
}

/// Dials and authenticates SSH connections.
///
/// Holds the loaded key and parsed proxy so that repeated connections (one
/// per forwarded tunnel stream) do not re-read key material.
pub struct Connector {
    user: String,
    key: Arc<KeyPair>,
    proxy: Option<ProxyUrl>,
    timeout: Option<Duration>,
    ssh_config: Arc<russh::client::Config>,
}

impl Connector {
    /// Load the key and parse the proxy from `config`.
    pub fn from_config(config: &ClientConfig) -> ConnectionResult<Self> {
        let key = load_private_key(&config.private_key, config.passphrase.as_deref())?;
        let proxy = config.proxy.as_deref().map(ProxyUrl::parse).transpose()?;

        Ok(Self {
            user: config.user.clone(),
            key: Arc::new(key),
            proxy,
            timeout: config.timeout,
            ssh_config: Arc::new(russh::client::Config::default()),
        })
    }

    /// Open an authenticated session to `server`.
    ///
    /// The connect timeout, when set, covers dial, handshake and authentication.
    pub async fn connect(&self, server: &Endpoint) -> ConnectionResult<Handle<ClientHandler>> {
        let attempt = self.establish(server);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt).await.map_err(|_| {
                ConnectionError::connect(server.to_string(), format!("timed out after {:?}", timeout))
            })?,
            None => attempt.await,
        }
    }

    async fn establish(&self, server: &Endpoint) -> ConnectionResult<Handle<ClientHandler>> {
        let addr = server.to_string();
        let stream = proxy::dial(server, self.proxy.as_ref()).await?;

        let handler = ClientHandler::new(addr.clone());
        let mut session = russh::client::connect_stream(Arc::clone(&self.ssh_config), stream, handler)
            .await
            .map_err(|e| ConnectionError::connect(&addr, format!("SSH handshake failed: {}", e)))?;

        let authenticated = session
            .authenticate_publickey(self.user.as_str(), Arc::clone(&self.key))
            .await
            .map_err(|e| ConnectionError::connect(&addr, format!("authentication failed: {}", e)))?;
        if !authenticated {
            return Err(ConnectionError::connect(
                &addr,
                format!("public key rejected for user {}", self.user),
            ));
        }

        debug!(addr = %addr, user = %self.user, "SSH connection established");
        Ok(session)
    }
}

/// SSH client
///
/// Connects lazily on first use and keeps one transport for its lifetime.
/// Every command and transfer opens its own channel, so several may run at
/// once on a shared client.
///
/// The handle sits in a [`ConnectionSlot`]: channel opens take the read lock
/// briefly, connect and close take the write lock. Concurrent first-time
/// callers therefore wait for a single dial instead of racing.
pub struct SshClient {
    config: ClientConfig,
    slot: ConnectionSlot<Handle<ClientHandler>>,
}

impl SshClient {
    /// Create a client. No I/O happens until the first operation.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            slot: ConnectionSlot::new(),
        }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a transport is currently established
    pub fn is_connected(&self) -> bool {
        self.slot.is_connected()
    }

    /// Establish the connection. Does nothing if already connected.
    pub async fn connect(&self) -> ConnectionResult<()> {
        self.handle().await.map(drop)
    }

    /// Disconnect. Does nothing if not connected.
    pub async fn close(&self) -> ConnectionResult<()> {
        if let Some(handle) = self.slot.take().await {
            debug!(host = %self.config.endpoint(), "Closing SSH connection");
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "Connection closed by client", "en")
                .await
            {
                debug!(error = %e, "Disconnect failed, connection already gone");
            }
        }
        Ok(())
    }

    async fn handle(&self) -> ConnectionResult<RwLockReadGuard<'_, Handle<ClientHandler>>> {
        let config = &self.config;
        self.slot
            .get_or_connect(move || async move {
                let connector = Connector::from_config(config)?;
                let endpoint = config.endpoint();
                info!(host = %endpoint, user = %config.user, "Connecting");
                connector.connect(&endpoint).await
            })
            .await
    }

    /// Run `command` and return its exit status.
    ///
    /// A command that runs and exits nonzero is `Ok(status)`; only
    /// infrastructure failures are errors (see [`ConnectionError::exit_code`]).
    pub async fn run(&self, command: &str) -> ConnectionResult<i32> {
        self.execute(command, None).await
    }

    /// Like [`run`](Self::run), also copying raw output to `writer`.
    pub async fn run_with_writer<W>(&self, command: &str, writer: &mut W) -> ConnectionResult<i32>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.execute(command, Some(writer)).await
    }

    async fn execute(
        &self,
        command: &str,
        sink: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    ) -> ConnectionResult<i32> {
        let work = async {
            // Hold the read lock only while opening the channel
            let mut channel = {
                let handle = self.handle().await?;
                handle
                    .channel_open_session()
                    .await
                    .map_err(|e| ConnectionError::Session(e.to_string()))?
            };

            if self.config.tty {
                self.request_pty(&mut channel).await?;
            }

            trace!(command = %command, "Executing remote command");
            channel
                .exec(true, command)
                .await
                .map_err(|e| ConnectionError::Start(e.to_string()))?;

            let mut pump = OutputPump::new(self.config.on_line.clone(), self.config.quiet);
            if let Some(sink) = sink {
                pump = pump.with_sink(sink);
            }
            while let Some(msg) = channel.wait().await {
                if pump.handle(msg).await? == PumpState::Closed {
                    break;
                }
            }

            let status = pump.finish().await?;
            trace!(exit_code = status, "Command completed");
            Ok(status)
        };

        match self.config.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, work)
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))?,
            None => work.await,
        }
    }

    async fn request_pty(&self, channel: &mut russh::Channel<russh::client::Msg>) -> ConnectionResult<()> {
        let tty_error = |message: String| ConnectionError::Tty {
            addr: self.config.endpoint().to_string(),
            message,
        };

        channel
            .request_pty(true, "xterm", 80, 24, 0, 0, PTY_MODES)
            .await
            .map_err(|e| tty_error(e.to_string()))?;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(tty_error("server rejected the pty request".to_string()))
                }
                Some(_) => continue,
                None => return Err(tty_error("channel closed".to_string())),
            }
        }
    }

    /// Open an SFTP session on a fresh channel
    async fn open_sftp(&self) -> ConnectionResult<SftpSession> {
        let channel = {
            let handle = self.handle().await?;
            handle
                .channel_open_session()
                .await
                .map_err(|e| ConnectionError::Session(format!("Failed to open channel: {}", e)))?
        };

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            ConnectionError::Session(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ConnectionError::Session(format!("Failed to create SFTP session: {}", e))
        })
    }

    /// Upload a local file to `remote_path`, returning the bytes written.
    pub async fn upload(&self, local_path: impl AsRef<Path>, remote_path: &str) -> ConnectionResult<u64> {
        let local_path = local_path.as_ref();
        let failed = |message: String| ConnectionError::Transfer {
            direction: TransferDirection::Upload,
            offset: 0,
            message,
        };

        debug!(local = %local_path.display(), remote = %remote_path, "Uploading file via SFTP");

        let mut source = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| failed(format!("Failed to open {}: {}", local_path.display(), e)))?;
        let size = source.metadata().await.ok().map(|m| m.len());

        let sftp = self.open_sftp().await?;
        let mut destination = sftp
            .create(remote_path)
            .await
            .map_err(|e| failed(format!("Failed to create remote file {}: {}", remote_path, e)))?;

        let mut progress = TransferProgress::upload(local_path, size);
        let reporter = ProgressReporter::new(&progress, self.config.quiet, self.config.on_progress.clone());
        let copied = copy_chunked(
            &mut source,
            &mut destination,
            self.config.effective_chunk_size(),
            &mut progress,
            |p| reporter.report(p),
        )
        .await?;

        info!(remote = %remote_path, bytes = copied, "Upload complete");
        Ok(copied)
    }

    /// Download `remote_path` into a local file, returning the bytes written.
    ///
    /// The local parent directory must already exist.
    pub async fn download(&self, remote_path: &str, local_path: impl AsRef<Path>) -> ConnectionResult<u64> {
        let local_path = local_path.as_ref();
        let failed = |message: String| ConnectionError::Transfer {
            direction: TransferDirection::Download,
            offset: 0,
            message,
        };

        debug!(remote = %remote_path, local = %local_path.display(), "Downloading file via SFTP");

        let sftp = self.open_sftp().await?;
        let mut source = sftp
            .open(remote_path)
            .await
            .map_err(|e| failed(format!("Failed to open remote file {}: {}", remote_path, e)))?;
        let size = sftp.metadata(remote_path).await.ok().and_then(|m| m.size);

        let mut destination = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| failed(format!("Failed to create {}: {}", local_path.display(), e)))?;

        let mut progress = TransferProgress::download(remote_path, size);
        let reporter = ProgressReporter::new(&progress, self.config.quiet, self.config.on_progress.clone());
        let copied = copy_chunked(
            &mut source,
            &mut destination,
            self.config.effective_chunk_size(),
            &mut progress,
            |p| reporter.report(p),
        )
        .await?;

        info!(local = %local_path.display(), bytes = copied, "Download complete");
        Ok(copied)
    }

    /// Run the configured tunnel until its listener fails.
    ///
    /// Key and proxy problems surface here, before the listener is bound.
    pub async fn start_tunnel(&self) -> ConnectionResult<()> {
        let spec = self
            .config
            .tunnel
            .clone()
            .ok_or_else(|| ConnectionError::InvalidConfig("No tunnel configured".to_string()))?;
        let connector = Arc::new(Connector::from_config(&self.config)?);
        Tunnel::new(spec, SshForwardDialer::new(connector)).start().await
    }
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}
