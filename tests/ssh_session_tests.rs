//! End-to-end tests against an in-process SSH server
//!
//! The server is built on `russh::server` and answers a tiny command
//! vocabulary (`exit N`, `echo TEXT`, `tty`), serves SFTP from a temporary
//! directory through `russh_sftp::server`, and relays `direct-tcpip` channels
//! to real TCP targets. It counts every TCP connection it accepts.

mod common;

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use pretty_assertions::assert_eq;
use russh::keys::key::{KeyPair, PublicKey};
use russh::server::{Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use russh_sftp::protocol::{Attrs, Data, FileAttributes, Handle, OpenFlags, Status, StatusCode};
use sshkit::connection::russh::Connector;
use sshkit::connection::{ClientConfig, Endpoint, SshClient, SshForwardDialer, Tunnel, TunnelSpec};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CHUNK: usize = 1024;

// ============================================================================
// Server
// ============================================================================

struct TestSshServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    root: TempDir,
}

impl TestSshServer {
    async fn start() -> Self {
        let config = russh::server::Config {
            auth_rejection_time: Duration::from_millis(50),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![KeyPair::generate_ed25519().unwrap()],
            ..Default::default()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let root = tempfile::tempdir().unwrap();

        let mut server = SessionFactory {
            accepted: Arc::clone(&accepted),
            root: root.path().to_path_buf(),
        };
        tokio::spawn(async move { server.run_on_socket(Arc::new(config), &listener).await });

        Self { addr, accepted, root }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn config(&self) -> ClientConfig {
        let key = fixture_key_path();
        ClientConfig::new("127.0.0.1", self.addr.port(), "deploy", key.to_str().unwrap())
            .quiet(true)
            .timeout(Duration::from_secs(10))
            .command_timeout(Duration::from_secs(10))
    }

    fn client(&self) -> SshClient {
        SshClient::new(self.config())
    }
}

struct SessionFactory {
    accepted: Arc<AtomicUsize>,
    root: PathBuf,
}

impl russh::server::Server for SessionFactory {
    type Handler = SessionHandler;

    fn new_client(&mut self, _: Option<SocketAddr>) -> SessionHandler {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        SessionHandler {
            root: self.root.clone(),
            channels: HashMap::new(),
            ptys: HashSet::new(),
        }
    }
}

struct SessionHandler {
    root: PathBuf,
    channels: HashMap<ChannelId, Channel<Msg>>,
    ptys: HashSet<ChannelId>,
}

/// Output of one command in the server's vocabulary.
struct Reply {
    stdout: String,
    stderr: String,
    status: u32,
}

impl SessionHandler {
    fn interpret(&self, channel: ChannelId, command: &str) -> Reply {
        let reply = |stdout: String, stderr: &str, status| Reply {
            stdout,
            stderr: stderr.to_string(),
            status,
        };

        if let Some(code) = command.strip_prefix("exit ") {
            return reply(String::new(), "", code.trim().parse().unwrap_or(255));
        }
        if let Some(text) = command.strip_prefix("echo ") {
            return reply(format!("{}\n", text), "", 0);
        }
        if command == "tty" {
            return match self.ptys.contains(&channel) {
                true => reply("/dev/pts/0\r\n".to_string(), "", 0),
                false => reply("not a tty\n".to_string(), "", 1),
            };
        }
        reply(String::new(), &format!("sh: {}: not found\n", command), 127)
    }
}

#[async_trait]
impl russh::server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, _: &PublicKey) -> Result<Auth, Self::Error> {
        Ok(match user {
            "deploy" => Auth::Accept,
            _ => Auth::Reject {
                proceed_with_methods: None,
            },
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let Ok(mut target) = TcpStream::connect((host_to_connect, port)).await else {
            return Ok(false);
        };

        let mut stream = channel.into_stream();
        tokio::spawn(async move {
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut target).await;
            let _ = stream.shutdown().await;
        });
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.ptys.insert(channel);
        session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        let command = String::from_utf8_lossy(data).into_owned();
        let reply = self.interpret(channel, &command);

        session.channel_success(channel);
        if !reply.stdout.is_empty() {
            session.data(channel, CryptoVec::from_slice(reply.stdout.as_bytes()));
        }
        if !reply.stderr.is_empty() {
            session.extended_data(channel, 1, CryptoVec::from_slice(reply.stderr.as_bytes()));
        }
        session.exit_status_request(channel, reply.status);
        session.eof(channel);
        session.close(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match (name, self.channels.remove(&channel)) {
            ("sftp", Some(opened)) => {
                session.channel_success(channel);
                let files = SftpFiles::new(self.root.clone());
                russh_sftp::server::run(opened.into_stream(), files).await;
            }
            _ => session.channel_failure(channel),
        }
        Ok(())
    }
}

/// SFTP file service rooted at a directory; every path is taken relative to it.
struct SftpFiles {
    root: PathBuf,
    handles: HashMap<String, PathBuf>,
    next_handle: u64,
}

impl SftpFiles {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn path_of(&self, handle: &str) -> Result<&Path, StatusCode> {
        self.handles
            .get(handle)
            .map(PathBuf::as_path)
            .ok_or(StatusCode::Failure)
    }

    fn ok(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        }
    }
}

fn not_found(_: std::io::Error) -> StatusCode {
    StatusCode::NoSuchFile
}

impl russh_sftp::server::Handler for SftpFiles {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let path = self.resolve(&filename);
        if pflags.contains(OpenFlags::CREATE) {
            std::fs::File::create(&path).map_err(|_| StatusCode::Failure)?;
        } else if !path.is_file() {
            return Err(StatusCode::NoSuchFile);
        }

        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.handles.insert(handle.clone(), path);
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(Self::ok(id))
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data, Self::Error> {
        let mut file = std::fs::File::open(self.path_of(&handle)?).map_err(not_found)?;
        file.seek(SeekFrom::Start(offset)).map_err(|_| StatusCode::Failure)?;

        let mut data = vec![0u8; len as usize];
        let n = file.read(&mut data).map_err(|_| StatusCode::Failure)?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.path_of(&handle)?)
            .map_err(not_found)?;
        file.seek(SeekFrom::Start(offset)).map_err(|_| StatusCode::Failure)?;
        file.write_all(&data).map_err(|_| StatusCode::Failure)?;
        Ok(Self::ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::metadata(self.resolve(&path)).map_err(not_found)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes {
                size: Some(metadata.len()),
                ..FileAttributes::empty()
            },
        })
    }
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_run_returns_remote_exit_status() {
    let server = TestSshServer::start().await;
    let client = server.client();

    for status in [0, 1, 3, 42, 255] {
        let code = client.run(&format!("exit {}", status)).await.unwrap();
        assert_eq!(code, status);
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_run_merges_stdout_and_stderr_lines() {
    let server = TestSshServer::start().await;
    let lines = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&lines);
    let client = SshClient::new(
        server
            .config()
            .on_line(move |line| seen.lock().unwrap().push(line.to_string())),
    );

    assert_eq!(client.run("echo deployed v2").await.unwrap(), 0);
    assert_eq!(client.run("uptime").await.unwrap(), 127);

    assert_eq!(
        *lines.lock().unwrap(),
        vec!["deployed v2".to_string(), "sh: uptime: not found".to_string()]
    );
}

#[tokio::test]
async fn test_run_with_writer_receives_raw_output() {
    let server = TestSshServer::start().await;
    let client = server.client();

    let mut output = Vec::new();
    let code = client.run_with_writer("echo  padded  ", &mut output).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(output, b" padded  \n".to_vec());
}

#[tokio::test]
async fn test_tty_requests_a_pty() {
    let server = TestSshServer::start().await;

    let lines = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&lines);
    let with_tty = SshClient::new(
        server
            .config()
            .tty(true)
            .on_line(move |line| seen.lock().unwrap().push(line.to_string())),
    );
    assert_eq!(with_tty.run("tty").await.unwrap(), 0);
    assert_eq!(*lines.lock().unwrap(), vec!["/dev/pts/0".to_string()]);

    let without_tty = server.client();
    assert_eq!(without_tty.run("tty").await.unwrap(), 1);
}

// ============================================================================
// Connection reuse
// ============================================================================

#[tokio::test]
async fn test_repeated_connect_reuses_one_session() {
    let server = TestSshServer::start().await;
    let client = server.client();

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.run("exit 0").await.unwrap(), 0);
    assert_eq!(client.run("exit 0").await.unwrap(), 0);

    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_concurrent_first_use_dials_once() {
    let server = TestSshServer::start().await;
    let client = server.client();

    let (a, b, c) = tokio::join!(client.connect(), client.run("exit 7"), client.run("exit 9"));
    a.unwrap();
    assert_eq!(b.unwrap(), 7);
    assert_eq!(c.unwrap(), 9);

    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_close_then_reconnect() {
    let server = TestSshServer::start().await;
    let client = server.client();

    client.connect().await.unwrap();
    client.close().await.unwrap();
    assert!(!client.is_connected());

    assert_eq!(client.run("exit 5").await.unwrap(), 5);
    assert!(client.is_connected());
    assert_eq!(server.accepted(), 2);
}

// ============================================================================
// SFTP
// ============================================================================

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_upload_then_download_is_identical() {
    let server = TestSshServer::start().await;
    let client = SshClient::new(server.config().chunk_size(CHUNK));
    let local = tempfile::tempdir().unwrap();

    for size in [0, CHUNK - 1, CHUNK, CHUNK + 1, 10 * CHUNK] {
        let original = payload(size);
        let source = local.path().join(format!("source-{}.bin", size));
        let fetched = local.path().join(format!("fetched-{}.bin", size));
        let remote = format!("payload-{}.bin", size);
        std::fs::write(&source, &original).unwrap();

        let sent = client.upload(&source, &remote).await.unwrap();
        assert_eq!(sent, size as u64, "upload of {} bytes", size);
        assert_eq!(std::fs::read(server.root.path().join(&remote)).unwrap(), original);

        let received = client.download(&remote, &fetched).await.unwrap();
        assert_eq!(received, size as u64, "download of {} bytes", size);
        assert!(std::fs::read(&fetched).unwrap() == original, "{} bytes differ", size);
    }

    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_download_missing_remote_file_fails() {
    let server = TestSshServer::start().await;
    let client = server.client();
    let local = tempfile::tempdir().unwrap();
    let target = local.path().join("never.bin");

    let err = client.download("absent.bin", &target).await.unwrap_err();
    assert_eq!(err.exit_code(), sshkit::connection::exit_code::TRANSFER_FAILED);
    assert!(err.to_string().contains("absent.bin"), "{}", err);
    assert!(!target.exists());
}

// ============================================================================
// Tunnel
// ============================================================================

#[tokio::test]
async fn test_tunnel_relays_through_ssh() {
    let server = TestSshServer::start().await;
    let echo = spawn_echo_server().await;

    let spec = TunnelSpec::new(
        Endpoint::new("127.0.0.1", 0),
        server.endpoint(),
        Endpoint::new("127.0.0.1", echo.port()),
    );
    let connector = Arc::new(Connector::from_config(&server.config()).unwrap());
    let tunnel = Tunnel::new(spec, SshForwardDialer::new(connector));
    let listener = tunnel.bind().await.unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(async move { tunnel.serve(listener).await });

    for message in [&b"first stream"[..], &b"second stream"[..]] {
        let mut socket = TcpStream::connect(local).await.unwrap();
        socket.write_all(message).await.unwrap();
        socket.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), socket.read_to_end(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, message.to_vec());
    }

    // One SSH connection per forwarded stream
    assert_eq!(server.accepted(), 2);
}
