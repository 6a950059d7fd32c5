//! Change feeds consumed by the reloader.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ReloaderError;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Other,
}

/// A single filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, path)
    }
}

/// Sender half for pushing batches into a [`ChannelSource`].
pub type BatchSender = mpsc::Sender<Vec<ChangeEvent>>;

/// A stream of change batches that ends when its stop token is cancelled.
///
/// Once `next_batch` has returned `None` it keeps returning `None`.
#[derive(Debug)]
pub struct ChangeFeed {
    batches: mpsc::Receiver<Vec<ChangeEvent>>,
    stop: CancellationToken,
}

impl ChangeFeed {
    pub fn new(batches: mpsc::Receiver<Vec<ChangeEvent>>, stop: CancellationToken) -> Self {
        Self { batches, stop }
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` as soon as the stop token is cancelled, including while
    /// waiting, or when the producer went away.
    pub async fn next_batch(&mut self) -> Option<Vec<ChangeEvent>> {
        if self.stop.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            batch = self.batches.recv() => batch,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Something that can watch a directory and report changes under it.
///
/// Each successful `open` yields an independent feed bound to `stop`.
pub trait WatchSource: Send + Sync {
    fn open(&self, root: &Path, stop: CancellationToken) -> Result<ChangeFeed, ReloaderError>;
}

/// A source fed by the application instead of the filesystem.
///
/// Useful when the host already runs its own watcher. The feed can only be
/// opened once, so a reloader using it cannot be restarted after `stop`.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<Vec<ChangeEvent>>>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, BatchSender) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            receiver: Mutex::new(Some(rx)),
        };
        (source, tx)
    }
}

impl WatchSource for ChannelSource {
    fn open(&self, _root: &Path, stop: CancellationToken) -> Result<ChangeFeed, ReloaderError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(ReloaderError::SourceExhausted)?;
        Ok(ChangeFeed::new(receiver, stop))
    }
}
