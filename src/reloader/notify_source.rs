//! Filesystem-backed change feed built on `notify`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::batcher::{BatchWindow, Batcher};
use super::source::{ChangeEvent, ChangeFeed, ChangeKind, WatchSource};
use super::ReloaderError;

/// Watches a directory tree with the platform's recommended watcher.
///
/// Raw events are coalesced into batches by a background task which also
/// owns the watcher; cancelling the stop token ends the task and releases
/// the watch.
#[derive(Debug, Clone)]
pub struct NotifySource {
    window: BatchWindow,
    capacity: usize,
}

impl NotifySource {
    pub fn new(window: BatchWindow) -> Self {
        Self {
            window,
            capacity: 100,
        }
    }

    /// Capacity of the raw event and batch channels.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn window(&self) -> BatchWindow {
        self.window
    }
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new(BatchWindow::default())
    }
}

impl WatchSource for NotifySource {
    fn open(&self, root: &Path, stop: CancellationToken) -> Result<ChangeFeed, ReloaderError> {
        if !root.is_dir() {
            return Err(ReloaderError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }

        let (raw_tx, raw_rx) = mpsc::channel(self.capacity);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| ReloaderError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("watcher", "watching", "{}", root.display());

        let (batch_tx, batch_rx) = mpsc::channel(self.capacity);
        tokio::spawn(coalesce(
            watcher,
            root.to_path_buf(),
            raw_rx,
            batch_tx,
            stop.clone(),
            self.window,
        ));

        Ok(ChangeFeed::new(batch_rx, stop))
    }
}

/// Group raw events into batches until stopped.
async fn coalesce(
    _watcher: RecommendedWatcher,
    root: PathBuf,
    mut raw_rx: mpsc::Receiver<notify::Result<Event>>,
    batch_tx: mpsc::Sender<Vec<ChangeEvent>>,
    stop: CancellationToken,
    window: BatchWindow,
) {
    let mut batcher = Batcher::new(window);

    loop {
        let deadline = batcher.deadline();

        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => {
                    let now = Instant::now();
                    for change in map_event(event) {
                        batcher.record_at(change, now);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("[watcher] file watch error: {e}");
                }
                None => break,
            },

            _ = wait_until(deadline) => {
                let batch = batcher.take();
                crate::debug_event!("watcher", "batch", "{} changes", batch.len());

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    sent = batch_tx.send(batch) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    crate::debug_event!("watcher", "stopped", "{}", root.display());
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Translate a raw `notify` event into change events.
///
/// Renames are reported as the old path going away and the new one
/// appearing.
fn map_event(event: Event) -> Vec<ChangeEvent> {
    let Event { kind, paths, .. } = event;

    let uniform = |kind: ChangeKind, paths: Vec<PathBuf>| {
        paths
            .into_iter()
            .map(|path| ChangeEvent::new(kind, path))
            .collect::<Vec<_>>()
    };

    match kind {
        EventKind::Create(_) => uniform(ChangeKind::Created, paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            uniform(ChangeKind::Deleted, paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            uniform(ChangeKind::Created, paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let mut paths = paths.into_iter();
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                changes.push(ChangeEvent::new(ChangeKind::Deleted, from));
            }
            if let Some(to) = paths.next() {
                changes.push(ChangeEvent::new(ChangeKind::Created, to));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => uniform(ChangeKind::Other, paths),
        EventKind::Modify(_) => uniform(ChangeKind::Modified, paths),
        EventKind::Remove(_) => uniform(ChangeKind::Deleted, paths),
        _ => uniform(ChangeKind::Other, paths),
    }
}
