//! Local TCP tunnel through an SSH hop
//!
//! A [`Tunnel`] listens on a local endpoint. Every accepted connection gets
//! its own SSH connection to the hop server and a `direct-tcpip` channel from
//! there to the remote endpoint, and bytes are relayed both ways until either
//! side closes. A failed forward only affects its own connection.
//!
//! ```text
//! client ──TCP──▶ local ══SSH══▶ server ──TCP──▶ remote
//! ```

use async_trait::async_trait;
use russh::client::Handle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace};

use super::endpoint::Endpoint;
use super::proxy::BoxedStream;
use super::russh::{ClientHandler, Connector};
use super::{ConnectionError, ConnectionResult};

/// Where a tunnel listens, which SSH server it hops through, and where it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub local: Endpoint,
    pub server: Endpoint,
    pub remote: Endpoint,
}

impl TunnelSpec {
    pub fn new(local: Endpoint, server: Endpoint, remote: Endpoint) -> Self {
        Self {
            local,
            server,
            remote,
        }
    }
}

/// Which leg of a forward failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStage {
    /// Connecting and authenticating to the SSH server
    Server,
    /// Opening the channel from the server to the remote endpoint
    Remote,
}

impl fmt::Display for ForwardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardStage::Server => write!(f, "server"),
            ForwardStage::Remote => write!(f, "remote"),
        }
    }
}

/// Produces the upstream stream for one forwarded connection.
#[async_trait]
pub trait ForwardDialer: Send + Sync + 'static {
    /// Reach `remote` by way of `server`.
    async fn dial(&self, server: &Endpoint, remote: &Endpoint) -> ConnectionResult<BoxedStream>;
}

/// Dials a fresh SSH connection per forward and opens a `direct-tcpip` channel.
pub struct SshForwardDialer {
    connector: Arc<Connector>,
}

impl SshForwardDialer {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ForwardDialer for SshForwardDialer {
    async fn dial(&self, server: &Endpoint, remote: &Endpoint) -> ConnectionResult<BoxedStream> {
        let session = self
            .connector
            .connect(server)
            .await
            .map_err(|e| ConnectionError::Forward {
                stage: ForwardStage::Server,
                addr: server.to_string(),
                message: e.to_string(),
            })?;

        let channel = session
            .channel_open_direct_tcpip(remote.host.as_str(), u32::from(remote.port), "127.0.0.1", 0)
            .await
            .map_err(|e| ConnectionError::Forward {
                stage: ForwardStage::Remote,
                addr: remote.to_string(),
                message: e.to_string(),
            })?;

        trace!(server = %server, remote = %remote, "direct-tcpip channel open");
        Ok(Box::new(ForwardedStream {
            stream: Box::pin(channel.into_stream()),
            _session: Box::new(session),
        }))
    }
}

/// Channel stream that keeps its SSH session alive for as long as it exists.
struct ForwardedStream<S> {
    stream: Pin<Box<S>>,
    _session: Box<Handle<ClientHandler>>,
}

impl<S: AsyncRead> AsyncRead for ForwardedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for ForwardedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}

/// Local listener forwarding every connection through `D`.
pub struct Tunnel<D> {
    spec: TunnelSpec,
    dialer: Arc<D>,
}

impl<D: ForwardDialer> Tunnel<D> {
    pub fn new(spec: TunnelSpec, dialer: D) -> Self {
        Self {
            spec,
            dialer: Arc::new(dialer),
        }
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    /// Bind the local endpoint.
    pub async fn bind(&self) -> ConnectionResult<TcpListener> {
        let addr = self.spec.local.to_string();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ConnectionError::Bind { addr, source })
    }

    /// Accept connections forever, spawning one forward per connection.
    ///
    /// Returns only when `accept` fails.
    pub async fn serve(&self, listener: TcpListener) -> ConnectionResult<()> {
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.spec.local.to_string());
        info!(
            local = %local,
            server = %self.spec.server,
            remote = %self.spec.remote,
            "Tunnel listening"
        );

        loop {
            let (socket, peer) = listener
                .accept()
                .await
                .map_err(|source| ConnectionError::Accept {
                    addr: local.clone(),
                    source,
                })?;
            trace!("Accepted connection from {}", peer);

            let dialer = Arc::clone(&self.dialer);
            let spec = self.spec.clone();
            tokio::spawn(async move {
                forward(socket, peer, dialer.as_ref(), &spec).await;
            });
        }
    }

    /// Bind, then serve.
    pub async fn start(&self) -> ConnectionResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

async fn forward<D: ForwardDialer + ?Sized>(socket: TcpStream, peer: SocketAddr, dialer: &D, spec: &TunnelSpec) {
    let upstream = match dialer.dial(&spec.server, &spec.remote).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Connection from {} failed: {}", peer, e);
            return;
        }
    };
    debug!("Forwarding {} → {} via {}", peer, spec.remote, spec.server);

    let (mut local_read, mut local_write) = socket.into_split();
    let (mut remote_read, mut remote_write) = tokio::io::split(upstream);

    let (sent, received) = tokio::join!(
        pump(&mut local_read, &mut remote_write),
        pump(&mut remote_read, &mut local_write),
    );

    match (sent, received) {
        (Ok(sent), Ok(received)) => {
            debug!("Connection from {} completed: {} bytes sent, {} bytes received", peer, sent, received);
        }
        (sent, received) => {
            if let Err(e) = sent {
                debug!("Connection from {}: local to remote copy ended: {}", peer, e);
            }
            if let Err(e) = received {
                debug!("Connection from {}: remote to local copy ended: {}", peer, e);
            }
        }
    }
}

/// Copy until end of stream, then shut down the write side either way.
async fn pump<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(reader, writer).await;
    let closed = writer.shutdown().await;
    let copied = copied?;
    closed?;
    Ok(copied)
}
