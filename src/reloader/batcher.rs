//! Coalescing of raw change events into batches.
//!
//! Editors usually produce several events per save (truncate, write, close,
//! metadata). Grouping them keeps one save from turning into a burst of
//! reloads arriving in separate batches.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::source::{ChangeEvent, ChangeKind};

/// Timing of the coalescing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    /// Upper bound on how long a batch stays open after its first event.
    pub debounce: Duration,
    /// A batch is flushed once no new event arrived for this long.
    pub step: Duration,
}

impl BatchWindow {
    pub fn from_millis(debounce_ms: u64, step_ms: u64) -> Self {
        Self {
            debounce: Duration::from_millis(debounce_ms),
            step: Duration::from_millis(step_ms),
        }
    }
}

impl Default for BatchWindow {
    fn default() -> Self {
        Self::from_millis(1600, 50)
    }
}

/// Accumulates events until the window closes.
#[derive(Debug)]
pub struct Batcher {
    window: BatchWindow,
    /// Pending events in arrival order.
    pending: Vec<ChangeEvent>,
    /// Seen `(kind, path)` pairs of the open batch.
    seen: HashSet<(ChangeKind, PathBuf)>,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl Batcher {
    pub fn new(window: BatchWindow) -> Self {
        Self {
            window,
            pending: Vec::new(),
            seen: HashSet::new(),
            first: None,
            last: None,
        }
    }

    /// Record an event now.
    pub fn record(&mut self, event: ChangeEvent) {
        self.record_at(event, Instant::now());
    }

    /// Record an event observed at `at`.
    ///
    /// Exact duplicates of an event already in the open batch are dropped but
    /// still keep the batch open.
    pub fn record_at(&mut self, event: ChangeEvent, at: Instant) {
        if self.first.is_none() {
            self.first = Some(at);
        }
        self.last = Some(at);

        if self.seen.insert((event.kind, event.path.clone())) {
            self.pending.push(event);
        }
    }

    /// When the open batch should be flushed, or `None` if nothing is pending.
    pub fn deadline(&self) -> Option<Instant> {
        let first = self.first?;
        let last = self.last?;
        Some((last + self.window.step).min(first + self.window.debounce))
    }

    /// Whether the open batch should be flushed at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Take the open batch, leaving the batcher empty.
    pub fn take(&mut self) -> Vec<ChangeEvent> {
        self.seen.clear();
        self.first = None;
        self.last = None;
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
