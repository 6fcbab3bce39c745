use crate::config::TailConfig;
use crate::error::IngestError;
use serde_json::Value;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// No log file to follow.
    Idle,
    Watching,
    /// Reached the end of the file (or hit an error); reopening shortly.
    Retrying,
}

impl TailerState {
    pub fn is_live(self) -> bool {
        !matches!(self, TailerState::Idle)
    }
}

/// Splits a byte stream on `\n`, holding back any trailing partial line
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let line = String::from_utf8_lossy(&self.pending[start..end]);
            lines.push(line.trim_end_matches('\r').to_string());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Parse one complete line. Blank lines are skipped.
pub fn parse_line(line: &str) -> Result<Option<Value>, IngestError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

enum FollowOutcome {
    Missing,
    EndOfFile,
    Stopped,
    ReceiverGone,
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Follows a growing line-delimited JSON file and forwards each decoded
/// record.
///
/// The read offset survives end-of-file, stop/start of monitoring and
/// reopening; it resets to zero when the file shrinks or is replaced.
/// Reads only start while `monitoring` is set. A read already in progress
/// finishes its current chunk.
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    identity: Option<u64>,
    splitter: LineSplitter,
    config: TailConfig,
    monitoring: Arc<AtomicBool>,
    state: watch::Sender<TailerState>,
}

impl LogTailer {
    pub fn new(
        path: impl Into<PathBuf>,
        config: TailConfig,
        monitoring: Arc<AtomicBool>,
    ) -> (Self, watch::Receiver<TailerState>) {
        let (state, state_rx) = watch::channel(TailerState::Idle);
        let tailer = LogTailer {
            path: path.into(),
            offset: 0,
            identity: None,
            splitter: LineSplitter::default(),
            config,
            monitoring,
            state,
        };
        (tailer, state_rx)
    }

    fn set_state(&self, next: TailerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?current, to = ?next, "tailer state");
            *current = next;
            true
        });
    }

    /// Follow the file until `shutdown` flips to true or the receiving side
    /// of `sender` is dropped.
    pub async fn run(mut self, sender: mpsc::Sender<Value>, mut shutdown: watch::Receiver<bool>) {
        let mut announced_missing = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = if !self.monitoring.load(Ordering::SeqCst) {
                self.config.poll_interval
            } else {
                match self.follow(&sender).await {
                    Ok(FollowOutcome::Missing) => {
                        if !announced_missing {
                            info!(path = %self.path.display(), "EVE log not found, waiting for it to be created");
                            announced_missing = true;
                        }
                        self.set_state(TailerState::Idle);
                        self.config.poll_interval
                    }
                    Ok(FollowOutcome::EndOfFile) => {
                        announced_missing = false;
                        self.set_state(TailerState::Retrying);
                        self.config.retry_delay
                    }
                    Ok(FollowOutcome::Stopped) => self.config.poll_interval,
                    Ok(FollowOutcome::ReceiverGone) => break,
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "error reading EVE log");
                        self.set_state(TailerState::Retrying);
                        self.config.retry_delay
                    }
                }
            };

            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        debug!(path = %self.path.display(), offset = self.offset, "tailer stopped");
    }

    async fn follow(&mut self, sender: &mpsc::Sender<Value>) -> Result<FollowOutcome, IngestError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FollowOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        let meta = file.metadata().await?;
        let identity = file_identity(&meta);
        let replaced = self.identity.is_some() && identity != self.identity;
        if meta.len() < self.offset || replaced {
            info!(path = %self.path.display(), "EVE log truncated or rotated, reading from start");
            self.offset = 0;
            self.splitter.clear();
        }
        self.identity = identity;

        file.seek(SeekFrom::Start(self.offset)).await?;
        self.set_state(TailerState::Watching);

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if !self.monitoring.load(Ordering::SeqCst) {
                return Ok(FollowOutcome::Stopped);
            }

            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(FollowOutcome::EndOfFile);
            }
            self.offset += n as u64;

            for line in self.splitter.push(&buf[..n]) {
                match parse_line(&line) {
                    Ok(Some(record)) => {
                        if sender.send(record).await.is_err() {
                            return Ok(FollowOutcome::ReceiverGone);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "skipping malformed EVE line"),
                }
            }
        }
    }
}

/// Returns true if shutdown was requested while waiting.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let changed = tokio::select! {
        _ = tokio::time::sleep(delay) => return false,
        changed = shutdown.changed() => changed,
    };
    changed.is_err() || *shutdown.borrow()
}
