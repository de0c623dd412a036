//! Local subprocess runner
//!
//! Runs a program (or a chain of shell commands) on the current host with a
//! deadline, streaming its merged stdout and stderr line by line.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::connection::LineHandler;

/// Default deadline for a subprocess
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from running a local process
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("Failed to spawn process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading output, writing to the sink, or waiting failed.
    #[error("Process I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The deadline elapsed and the process was killed.
    #[error("Process timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for subprocess operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Options for [`SubProcess`]
#[derive(Clone)]
pub struct SubProcessOptions {
    /// Do not log output lines
    pub quiet: bool,
    /// Deadline for the whole run
    pub timeout: Duration,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
    /// Called with every trimmed output line
    pub on_line: Option<LineHandler>,
}

impl Default for SubProcessOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
            on_line: None,
        }
    }
}

impl SubProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_line_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_line = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for SubProcessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubProcessOptions")
            .field("quiet", &self.quiet)
            .field("timeout", &self.timeout)
            .field("env", &self.env)
            .field("on_line", &self.on_line.is_some())
            .finish()
    }
}

/// Local process runner
#[derive(Debug, Clone)]
pub struct SubProcess {
    options: SubProcessOptions,
    shell: &'static str,
    shell_arg: &'static str,
}

impl SubProcess {
    pub fn new() -> Self {
        Self::with_options(SubProcessOptions::default())
    }

    pub fn with_options(options: SubProcessOptions) -> Self {
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd.exe", "/C")
        } else {
            ("/bin/sh", "-c")
        };
        Self {
            options,
            shell,
            shell_arg,
        }
    }

    pub fn options(&self) -> &SubProcessOptions {
        &self.options
    }

    /// Run `commands` joined with `&&` through the platform shell.
    pub async fn shell_exec<S: AsRef<str>>(&self, commands: &[S]) -> ProcessResult<i32> {
        let script = join_commands(commands);
        self.run(self.shell, &[self.shell_arg, script.as_str()]).await
    }

    /// Like [`shell_exec`](Self::shell_exec), also copying the raw merged output to `writer`.
    pub async fn shell_exec_with_writer<S, W>(&self, commands: &[S], writer: &mut W) -> ProcessResult<i32>
    where
        S: AsRef<str>,
        W: AsyncWrite + Unpin + Send,
    {
        let script = join_commands(commands);
        self.execute(self.shell, &[self.shell_arg, script.as_str()], Some(writer))
            .await
    }

    /// Run `program` with `args` and return its exit code.
    ///
    /// A process killed by a signal reports `-1`.
    pub async fn run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> ProcessResult<i32> {
        self.execute(program, args, None).await
    }

    /// Like [`run`](Self::run), also copying the raw merged output to `writer`.
    pub async fn run_with_writer<S, W>(&self, program: &str, args: &[S], writer: &mut W) -> ProcessResult<i32>
    where
        S: AsRef<str>,
        W: AsyncWrite + Unpin + Send,
    {
        self.execute(program, args, Some(writer)).await
    }

    async fn execute<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        mut writer: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    ) -> ProcessResult<i32> {
        debug!(program = %program, "Executing local command");

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(AsRef::as_ref))
            .envs(self.options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;

        let (tx, mut chunks) = mpsc::channel(64);
        spawn_reader(stdout, tx.clone());
        spawn_reader(stderr, tx);

        let work = async {
            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;

                if let Some(writer) = writer.as_mut() {
                    writer.write_all(&chunk).await?;
                }

                let line = String::from_utf8_lossy(&chunk);
                let line = line.trim();
                if let Some(handler) = &self.options.on_line {
                    handler(line);
                }
                if !self.options.quiet {
                    info!("{}", line);
                }
            }
            if let Some(writer) = writer.as_mut() {
                writer.flush().await?;
            }

            let status = child.wait().await?;
            Ok::<_, ProcessError>(status.code().unwrap_or(-1))
        };

        let outcome = tokio::time::timeout(self.options.timeout, work).await;
        match outcome {
            Ok(result) => {
                let code = result?;
                trace!(exit_code = code, "Command completed");
                Ok(code)
            }
            Err(_) => {
                warn!(program = %program, timeout = ?self.options.timeout, "Process timed out, killing it");
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Failed to kill timed out process");
                }
                Err(ProcessError::Timeout(self.options.timeout))
            }
        }
    }
}

impl Default for SubProcess {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward `source` to `tx` one line at a time, delimiter included.
fn spawn_reader<R>(source: R, tx: mpsc::Sender<io::Result<Vec<u8>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        loop {
            let mut chunk = Vec::new();
            match reader.read_until(b'\n', &mut chunk).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
}

fn join_commands<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" && ")
}
