//! Shared helpers for the sshkit integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Passphrase of the encrypted fixture key.
pub const FIXTURE_PASSPHRASE: &str = "secret";

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Path of an unencrypted ed25519 test key.
pub fn fixture_key_path() -> PathBuf {
    fixtures_dir().join("keys").join("id_ed25519")
}

/// Path of an ed25519 test key encrypted with [`FIXTURE_PASSPHRASE`].
pub fn encrypted_key_path() -> PathBuf {
    fixtures_dir().join("keys").join("id_ed25519_encrypted")
}

/// A loopback port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// TCP server that writes back everything it reads, one task per connection.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(echo(socket));
        }
    });
    addr
}

async fn echo(mut socket: TcpStream) {
    let (mut reader, mut writer) = socket.split();
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
    let _ = writer.shutdown().await;
}

/// Single-connection HTTP proxy stand-in.
///
/// Reads the request head, answers with `status_line`, then echoes the
/// tunnelled bytes when the status is 200. The handle yields the request head.
pub async fn spawn_http_proxy(status_line: &'static str) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if socket.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }

        let reply = format!("{}\r\nProxy-Agent: test\r\n\r\n", status_line);
        socket.write_all(reply.as_bytes()).await.unwrap();

        if status_line.contains(" 200 ") {
            echo(socket).await;
        }
        String::from_utf8_lossy(&head).into_owned()
    });
    (addr, handle)
}
