//! Chunked file copy and progress reporting
//!
//! Both SFTP directions funnel through [`copy_chunked`], which moves bytes in
//! fixed-size chunks and updates a [`TransferProgress`] after each one.

use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::config::DEFAULT_CHUNK_SIZE;
use super::{ConnectionError, ConnectionResult};

/// Progress information for a file transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Path of the file being transferred
    pub path: PathBuf,
    /// Total size of the file in bytes, when known
    pub total_bytes: Option<u64>,
    /// Number of bytes transferred so far
    pub transferred_bytes: u64,
    /// Transfer direction
    pub direction: TransferDirection,
    /// Current transfer phase
    pub phase: TransferPhase,
}

impl TransferProgress {
    /// Create a new transfer progress for upload
    pub fn upload(path: impl Into<PathBuf>, total_bytes: Option<u64>) -> Self {
        Self::new(path, total_bytes, TransferDirection::Upload)
    }

    /// Create a new transfer progress for download
    pub fn download(path: impl Into<PathBuf>, total_bytes: Option<u64>) -> Self {
        Self::new(path, total_bytes, TransferDirection::Download)
    }

    fn new(path: impl Into<PathBuf>, total_bytes: Option<u64>, direction: TransferDirection) -> Self {
        Self {
            path: path.into(),
            total_bytes,
            transferred_bytes: 0,
            direction,
            phase: TransferPhase::Starting,
        }
    }

    /// Percentage completed (0-100).
    ///
    /// `None` when the total is unknown. An empty file is 100% done.
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            None => None,
            Some(0) => Some(100.0),
            Some(total) => Some((self.transferred_bytes as f64 / total as f64) * 100.0),
        }
    }

    /// Check if the transfer is complete
    pub fn is_complete(&self) -> bool {
        matches!(self.phase, TransferPhase::Completed)
    }

    /// Record `n` more bytes
    pub fn advance(&mut self, n: u64) {
        self.transferred_bytes += n;
        self.phase = TransferPhase::Transferring;
    }

    /// Mark the transfer finished
    pub fn complete(&mut self) {
        self.phase = TransferPhase::Completed;
    }
}

/// Direction of the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Current phase of the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Starting,
    Transferring,
    Completed,
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// Fans progress updates out to the terminal bar and the user callback.
pub(crate) struct ProgressReporter {
    bar: Option<ProgressBar>,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    /// The bar is only drawn when stdout is a terminal and output is not quiet.
    pub(crate) fn new(progress: &TransferProgress, quiet: bool, callback: Option<ProgressCallback>) -> Self {
        let bar = (!quiet && std::io::stdout().is_terminal()).then(|| transfer_bar(progress));
        Self { bar, callback }
    }

    pub(crate) fn report(&self, progress: &TransferProgress) {
        if let Some(bar) = &self.bar {
            bar.set_position(progress.transferred_bytes);
            if progress.is_complete() {
                bar.finish();
            }
        }
        if let Some(callback) = &self.callback {
            callback(progress);
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

fn transfer_bar(progress: &TransferProgress) -> ProgressBar {
    let bar = match progress.total_bytes {
        Some(total) => {
            let style = ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .map(|style| style.progress_chars("=>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(total).with_style(style)
        }
        None => {
            let style = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix:.bold} {bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            ProgressBar::new_spinner().with_style(style)
        }
    };
    bar.with_prefix(format!("{} {}", progress.direction, progress.path.display()))
}

/// Copy `reader` into `writer` in chunks of `chunk_size` bytes.
///
/// `progress` is advanced after every chunk and `on_progress` sees the start,
/// each chunk, and the completion. End of input terminates the copy; the
/// writer is shut down afterwards. Returns the number of bytes copied.
pub async fn copy_chunked<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    progress: &mut TransferProgress,
    mut on_progress: F,
) -> ConnectionResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(&TransferProgress),
{
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let direction = progress.direction;
    let failed = |offset: u64, what: &str, e: std::io::Error| ConnectionError::Transfer {
        direction,
        offset,
        message: format!("{} failed: {}", what, e),
    };

    let mut buf = vec![0u8; chunk_size];
    let mut copied: u64 = 0;
    on_progress(progress);

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| failed(copied, "read", e))?;
        if n == 0 {
            break;
        }

        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| failed(copied, "write", e))?;

        copied += n as u64;
        progress.advance(n as u64);
        trace!(copied = copied, "Transferred chunk");
        on_progress(progress);
    }

    writer
        .shutdown()
        .await
        .map_err(|e| failed(copied, "close", e))?;

    progress.complete();
    on_progress(progress);
    Ok(copied)
}
