//! Client configuration
//!
//! [`ClientConfig`] collects everything [`SshClient`](super::SshClient) needs:
//! target, credentials, proxy routing, timeouts and output/progress hooks.
//! It is built once with chained setters and is immutable afterwards.

use russh::keys::key::KeyPair;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::endpoint::Endpoint;
use super::transfer::ProgressCallback;
use super::tunnel::TunnelSpec;
use super::{ConnectionError, ConnectionResult};

/// Default chunk size for file transfers in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Callback invoked with every line of remote output.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// SSH client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Remote host name or address
    pub host: String,
    /// Remote SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Private key: a path when it starts with `~/` or `/`, otherwise the key text
    pub private_key: String,
    /// Passphrase for an encrypted private key
    pub passphrase: Option<String>,
    /// Suppress per-line logging and the terminal progress bar
    pub quiet: bool,
    /// Proxy URL (`http`, `https`, `socks5`, `socks5h`)
    pub proxy: Option<String>,
    /// Deadline for dial, handshake and authentication together
    pub timeout: Option<Duration>,
    /// Deadline for a single remote command
    pub command_timeout: Option<Duration>,
    /// Request a pseudo-terminal for commands
    pub tty: bool,
    /// Transfer chunk size in bytes (zero means [`DEFAULT_CHUNK_SIZE`])
    pub chunk_size: usize,
    /// Tunnel to run with [`SshClient::start_tunnel`](super::SshClient::start_tunnel)
    pub tunnel: Option<TunnelSpec>,
    /// Per-line output handler
    pub on_line: Option<LineHandler>,
    /// Transfer progress callback
    pub on_progress: Option<ProgressCallback>,
}

impl ClientConfig {
    /// Create a configuration for `user@host:port` authenticating with `private_key`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            private_key: private_key.into(),
            passphrase: None,
            quiet: false,
            proxy: None,
            timeout: None,
            command_timeout: None,
            tty: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tunnel: None,
            on_line: None,
            on_progress: None,
        }
    }

    /// Set the key passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Suppress output logging and progress bars
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Route the connection through a proxy
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Set the connect timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-command deadline
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Request a PTY for commands
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Set the transfer chunk size
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Attach a tunnel definition
    pub fn tunnel(mut self, tunnel: TunnelSpec) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    /// Install a per-line output handler
    pub fn on_line<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_line = Some(Arc::new(handler));
        self
    }

    /// Install a transfer progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&super::TransferProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// The SSH server endpoint
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Chunk size with the zero fallback applied
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("quiet", &self.quiet)
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("command_timeout", &self.command_timeout)
            .field("tty", &self.tty)
            .field("chunk_size", &self.chunk_size)
            .field("tunnel", &self.tunnel)
            .field("on_line", &self.on_line.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Whether a private key value names a file rather than holding the key itself.
pub fn is_key_path(value: &str) -> bool {
    value.starts_with("~/") || value.starts_with('/')
}

/// Expand a leading `~` to the home directory. `$VAR` is left untouched.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load a private key from a path (`~/...` or `/...`) or from inline key text.
///
/// Every failure is reported as [`ConnectionError::Auth`].
pub fn load_private_key(value: &str, passphrase: Option<&str>) -> ConnectionResult<KeyPair> {
    if value.trim().is_empty() {
        return Err(ConnectionError::Auth("No private key configured".to_string()));
    }

    let (source, text) = if is_key_path(value) {
        let path = expand_path(value);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ConnectionError::Auth(format!("Failed to read key {}: {}", path.display(), e))
        })?;
        (path.display().to_string(), text)
    } else {
        ("inline key".to_string(), value.to_string())
    };

    let key = russh::keys::decode_secret_key(&text, passphrase).map_err(|e| {
        ConnectionError::Auth(format!("Failed to load {}: {}", source, e))
    })?;

    debug!(source = %source, algorithm = %key.name(), "Loaded private key");
    Ok(key)
}
