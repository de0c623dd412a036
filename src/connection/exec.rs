//! Remote command output handling
//!
//! [`OutputPump`] consumes the messages of one session channel. Stdout and
//! stderr are merged in delivery order, optionally copied verbatim to a sink,
//! split into lines for the line handler and the log, and the exit status is
//! recorded for [`OutputPump::finish`].

use russh::ChannelMsg;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use super::config::LineHandler;
use super::{ConnectionError, ConnectionResult};

/// Whether the channel has more to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Open,
    Closed,
}

/// Line-splitting consumer for session channel messages.
pub struct OutputPump<'a> {
    sink: Option<&'a mut (dyn AsyncWrite + Unpin + Send)>,
    on_line: Option<LineHandler>,
    quiet: bool,
    partial: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
}

impl<'a> OutputPump<'a> {
    pub fn new(on_line: Option<LineHandler>, quiet: bool) -> Self {
        Self {
            sink: None,
            on_line,
            quiet,
            partial: Vec::new(),
            exit_status: None,
            exit_signal: None,
        }
    }

    /// Copy raw output bytes to `sink` as they arrive.
    pub fn with_sink(mut self, sink: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handle one channel message.
    pub async fn handle(&mut self, msg: ChannelMsg) -> ConnectionResult<PumpState> {
        match msg {
            ChannelMsg::Data { ref data } => self.output(data).await?,
            ChannelMsg::ExtendedData { ref data, ext } => {
                trace!(ext = ext, len = data.len(), "Extended data");
                self.output(data).await?
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_status = Some(exit_status);
            }
            ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            } => {
                debug!(signal = ?signal_name, message = %error_message, "Remote command killed by signal");
                self.exit_signal = Some(format!("{:?}", signal_name));
            }
            ChannelMsg::Failure => {
                return Err(ConnectionError::Start(
                    "server refused the exec request".to_string(),
                ));
            }
            ChannelMsg::Close => return Ok(PumpState::Closed),
            _ => {}
        }
        Ok(PumpState::Open)
    }

    async fn output(&mut self, data: &[u8]) -> ConnectionResult<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(data).await.map_err(ConnectionError::Sink)?;
        }

        self.partial.extend_from_slice(data);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(())
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = String::from_utf8_lossy(line);
        if let Some(handler) = &self.on_line {
            handler(&line);
        }
        if !self.quiet {
            info!("{}", line);
        }
    }

    /// Flush the trailing partial line and turn the recorded status into a result.
    ///
    /// A reported exit status N yields `Ok(N)`, whatever N is. A channel that
    /// closed without one (including a signal-only exit) is a
    /// [`ConnectionError::Wait`].
    pub async fn finish(mut self) -> ConnectionResult<i32> {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.emit(&rest);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.flush().await.map_err(ConnectionError::Sink)?;
        }

        match (self.exit_status, self.exit_signal) {
            (Some(status), _) => Ok(status as i32),
            (None, Some(signal)) => Err(ConnectionError::Wait(format!(
                "remote command terminated by signal {}",
                signal
            ))),
            (None, None) => Err(ConnectionError::Wait(
                "channel closed without an exit status".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;
    use std::sync::{Arc, Mutex};

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    fn stderr(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext: 1,
        }
    }

    fn collector() -> (LineHandler, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let handler: LineHandler = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        (handler, lines)
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        for status in [0u32, 1, 3, 127, 255] {
            let mut pump = OutputPump::new(None, true);
            pump.handle(ChannelMsg::ExitStatus { exit_status: status })
                .await
                .unwrap();
            assert_eq!(pump.handle(ChannelMsg::Close).await.unwrap(), PumpState::Closed);
            assert_eq!(pump.finish().await.unwrap(), status as i32);
        }
    }

    #[tokio::test]
    async fn test_lines_split_across_messages() {
        let (handler, lines) = collector();
        let mut pump = OutputPump::new(Some(handler), true);

        pump.handle(data(b"hel")).await.unwrap();
        pump.handle(data(b"lo\r\nwor")).await.unwrap();
        pump.handle(stderr(b"oops\n")).await.unwrap();
        pump.handle(data(b"ld")).await.unwrap();
        pump.handle(ChannelMsg::ExitStatus { exit_status: 0 })
            .await
            .unwrap();
        pump.finish().await.unwrap();

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["hello".to_string(), "woroops".to_string(), "ld".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sink_receives_raw_bytes() {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut pump = OutputPump::new(None, true).with_sink(&mut out);
            pump.handle(data(b"a\r\n")).await.unwrap();
            pump.handle(stderr(b"b\n")).await.unwrap();
            pump.handle(ChannelMsg::ExitStatus { exit_status: 2 })
                .await
                .unwrap();
            assert_eq!(pump.finish().await.unwrap(), 2);
        }
        assert_eq!(out, b"a\r\nb\n");
    }

    #[tokio::test]
    async fn test_close_without_status_is_wait_error() {
        let mut pump = OutputPump::new(None, true);
        pump.handle(ChannelMsg::Eof).await.unwrap();
        pump.handle(ChannelMsg::Close).await.unwrap();
        assert!(matches!(pump.finish().await, Err(ConnectionError::Wait(_))));
    }

    #[tokio::test]
    async fn test_exec_failure_is_start_error() {
        let mut pump = OutputPump::new(None, true);
        assert!(matches!(
            pump.handle(ChannelMsg::Failure).await,
            Err(ConnectionError::Start(_))
        ));
    }
}
