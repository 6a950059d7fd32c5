use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autoreload::reloader::{BatchSender, BatchWindow, ChannelSource};
use autoreload::{
    ChangeEvent, ChangeKind, ExtensionHost, ExtensionId, HostError, ReloadHooks, Reloader,
    ReloaderError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Reloaded(String),
    Failed(String),
}

/// Host with a fixed set of loaded extensions that records reload calls.
struct RecordingHost {
    loaded: HashSet<String>,
    failing: HashSet<String>,
    calls: parking_lot::Mutex<Vec<String>>,
}

impl RecordingHost {
    fn new(loaded: &[&str]) -> Self {
        Self {
            loaded: loaded.iter().map(|s| s.to_string()).collect(),
            failing: HashSet::new(),
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, extension: &str) -> Self {
        self.failing.insert(extension.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExtensionHost for RecordingHost {
    fn is_loaded(&self, extension: &ExtensionId) -> bool {
        self.loaded.contains(extension.as_str())
    }

    async fn reload(&self, extension: &ExtensionId) -> Result<(), HostError> {
        self.calls.lock().push(extension.to_string());
        if self.failing.contains(extension.as_str()) {
            return Err(HostError::reload_failed(
                extension.as_str(),
                "raised during setup",
            ));
        }
        Ok(())
    }
}

struct RecordingHooks {
    tx: mpsc::UnboundedSender<Outcome>,
}

#[async_trait]
impl ReloadHooks for RecordingHooks {
    async fn on_reload(&self, extension: &ExtensionId) {
        let _ = self.tx.send(Outcome::Reloaded(extension.to_string()));
    }

    async fn on_error(&self, extension: &ExtensionId, error: &HostError) {
        assert!(error.is_reload_failure());
        let _ = self.tx.send(Outcome::Failed(extension.to_string()));
    }
}

struct Harness {
    reloader: Reloader,
    events: BatchSender,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
}

/// Reloader over `/bot/cogs` fed through a channel.
fn harness(excluded: &[&str]) -> Harness {
    let (source, events) = ChannelSource::new(16);
    let (tx, outcomes) = mpsc::unbounded_channel();

    let reloader = Reloader::builder()
        .directory("cogs")
        .base_dir("/bot")
        .exclude(excluded.iter().copied())
        .source(source)
        .hooks(RecordingHooks { tx })
        .build()
        .unwrap();

    Harness {
        reloader,
        events,
        outcomes,
    }
}

async fn next_outcome(outcomes: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .expect("timed out waiting for a reload outcome")
        .expect("hooks dropped")
}

async fn assert_no_outcome(outcomes: &mut mpsc::UnboundedReceiver<Outcome>) {
    let result = tokio::time::timeout(Duration::from_millis(200), outcomes.recv()).await;
    assert!(result.is_err(), "unexpected outcome: {result:?}");
}

#[tokio::test]
async fn test_modified_extension_is_reloaded() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await
        .unwrap();

    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Reloaded("cogs.music".to_string())
    );
    assert_eq!(host.calls(), vec!["cogs.music"]);

    h.reloader.stop();
}

#[tokio::test]
async fn test_package_initializer_reloads_package() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.admin"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/admin/__init__.py")])
        .await
        .unwrap();

    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Reloaded("cogs.admin".to_string())
    );
    assert_eq!(host.calls(), vec!["cogs.admin"]);
}

#[tokio::test]
async fn test_excluded_extension_is_skipped() {
    let mut h = harness(&["cogs.music"]);
    let host = Arc::new(RecordingHost::new(&["cogs.music", "cogs.admin"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![
            ChangeEvent::modified("/bot/cogs/music.py"),
            ChangeEvent::modified("/bot/cogs/admin.py"),
        ])
        .await
        .unwrap();

    // The admin reload proves the batch was processed past the excluded event
    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Reloaded("cogs.admin".to_string())
    );
    assert_no_outcome(&mut h.outcomes).await;
    assert_eq!(host.calls(), vec!["cogs.admin"]);
}

#[tokio::test]
async fn test_only_excluded_change_fires_nothing() {
    let mut h = harness(&["cogs.music"]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await
        .unwrap();

    assert_no_outcome(&mut h.outcomes).await;
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_unloaded_files_are_skipped() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![
            // Helper module that is not an extension
            ChangeEvent::modified("/bot/cogs/utils/checks.py"),
            ChangeEvent::modified("/bot/cogs/music.py"),
        ])
        .await
        .unwrap();

    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Reloaded("cogs.music".to_string())
    );
    assert_no_outcome(&mut h.outcomes).await;
    assert_eq!(host.calls(), vec!["cogs.music"]);
}

#[tokio::test]
async fn test_only_modifications_trigger_reloads() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![
            ChangeEvent::new(ChangeKind::Created, "/bot/cogs/music.py"),
            ChangeEvent::new(ChangeKind::Deleted, "/bot/cogs/music.py"),
            ChangeEvent::new(ChangeKind::Other, "/bot/cogs/music.py"),
        ])
        .await
        .unwrap();

    assert_no_outcome(&mut h.outcomes).await;
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_each_modification_reloads_once() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await
        .unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await
        .unwrap();

    for _ in 0..2 {
        assert_eq!(
            next_outcome(&mut h.outcomes).await,
            Outcome::Reloaded("cogs.music".to_string())
        );
    }
    assert_no_outcome(&mut h.outcomes).await;
    assert_eq!(host.calls().len(), 2);
}

#[tokio::test]
async fn test_reload_failure_reports_error_and_keeps_watching() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music", "cogs.admin"]).failing("cogs.music"));

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await
        .unwrap();

    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Failed("cogs.music".to_string())
    );
    assert!(!h.reloader.stopped());

    h.events
        .send(vec![ChangeEvent::modified("/bot/cogs/admin.py")])
        .await
        .unwrap();
    assert_eq!(
        next_outcome(&mut h.outcomes).await,
        Outcome::Reloaded("cogs.admin".to_string())
    );
    assert_no_outcome(&mut h.outcomes).await;
}

/// Host whose reloads block until released.
struct SlowHost {
    release: tokio::sync::Notify,
    started: AtomicUsize,
}

#[async_trait]
impl ExtensionHost for SlowHost {
    fn is_loaded(&self, _extension: &ExtensionId) -> bool {
        true
    }

    async fn reload(&self, _extension: &ExtensionId) -> Result<(), HostError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_reload_does_not_block_loop() {
    let mut h = harness(&[]);
    let host = Arc::new(SlowHost {
        release: tokio::sync::Notify::new(),
        started: AtomicUsize::new(0),
    });

    h.reloader.start(host.clone()).unwrap();
    h.events
        .send(vec![
            ChangeEvent::modified("/bot/cogs/music.py"),
            ChangeEvent::modified("/bot/cogs/admin.py"),
        ])
        .await
        .unwrap();

    // Both reloads get started while neither has finished
    tokio::time::timeout(Duration::from_secs(5), async {
        while host.started.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reloads should run concurrently");

    host.release.notify_waiters();

    let mut reloaded = vec![
        next_outcome(&mut h.outcomes).await,
        next_outcome(&mut h.outcomes).await,
    ];
    reloaded.sort_by_key(|o| format!("{o:?}"));
    assert_eq!(
        reloaded,
        vec![
            Outcome::Reloaded("cogs.admin".to_string()),
            Outcome::Reloaded("cogs.music".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_start_twice_fails() {
    let h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&[]));

    assert!(h.reloader.stopped());
    h.reloader.start(host.clone()).unwrap();
    assert!(!h.reloader.stopped());

    let second = h.reloader.start(host.clone());
    assert!(matches!(second, Err(ReloaderError::AlreadyRunning)));
    assert!(!h.reloader.stopped());

    h.reloader.stop();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    // Stopping a reloader that never ran is fine
    h.reloader.stop();
    assert!(h.reloader.stopped());

    h.reloader.start(host.clone()).unwrap();
    h.reloader.stop();
    assert!(h.reloader.stopped());
    h.reloader.stop();
    assert!(h.reloader.stopped());

    // The loop is gone, so changes are no longer acted on
    let _ = h
        .events
        .send(vec![ChangeEvent::modified("/bot/cogs/music.py")])
        .await;
    assert_no_outcome(&mut h.outcomes).await;
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_loop_ending_marks_stopped() {
    let h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&[]));

    h.reloader.start(host).unwrap();
    drop(h.events);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.reloader.stopped() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reloader should report stopped once its feed ends");
}

#[tokio::test]
async fn test_channel_source_cannot_restart() {
    let h = harness(&[]);
    let host = Arc::new(RecordingHost::new(&[]));

    h.reloader.start(host.clone()).unwrap();
    h.reloader.stop();

    let restarted = h.reloader.start(host);
    assert!(matches!(restarted, Err(ReloaderError::SourceExhausted)));
    assert!(h.reloader.stopped());
}

#[tokio::test]
async fn test_missing_directory_fails_to_start() {
    let temp_dir = TempDir::new().unwrap();
    let reloader = Reloader::builder()
        .directory("cogs")
        .base_dir(temp_dir.path())
        .build()
        .unwrap();

    let result = reloader.start(Arc::new(RecordingHost::new(&[])));

    assert!(matches!(result, Err(ReloaderError::DirectoryNotFound { .. })));
    assert!(reloader.stopped());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filesystem_change_reloads_extension() {
    let temp_dir = TempDir::new().unwrap();
    let cogs = temp_dir.path().join("cogs");
    std::fs::create_dir(&cogs).unwrap();
    std::fs::write(cogs.join("music.py"), "VOLUME = 1\n").unwrap();
    std::fs::write(cogs.join("owner.py"), "OWNER = 1\n").unwrap();

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let reloader = Reloader::builder()
        .directory("cogs")
        .base_dir(temp_dir.path())
        .exclude(["cogs.owner"])
        .batch_window(BatchWindow::from_millis(200, 50))
        .hooks(RecordingHooks { tx })
        .build()
        .unwrap();
    let host = Arc::new(RecordingHost::new(&["cogs.music", "cogs.owner"]));

    for round in 0..2 {
        reloader.start(host.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(cogs.join("owner.py"), format!("OWNER = {round}\n")).unwrap();
        std::fs::write(cogs.join("music.py"), format!("VOLUME = {round}\n")).unwrap();

        assert_eq!(
            next_outcome(&mut outcomes).await,
            Outcome::Reloaded("cogs.music".to_string())
        );

        reloader.stop();
        assert!(reloader.stopped());

        // Drain duplicates from editors/OS reporting the write more than once
        while tokio::time::timeout(Duration::from_millis(300), outcomes.recv())
            .await
            .is_ok_and(|o| o.is_some())
        {}
    }

    assert!(host.calls().iter().all(|c| c == "cogs.music"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_symlinked_directory_reloads_by_link_name() {
    let temp_dir = TempDir::new().unwrap();
    let bot = temp_dir.path().join("bot");
    let shared = temp_dir.path().join("shared_cogs");
    std::fs::create_dir(&bot).unwrap();
    std::fs::create_dir(&shared).unwrap();
    std::fs::write(shared.join("music.py"), "VOLUME = 1\n").unwrap();
    std::os::unix::fs::symlink(&shared, bot.join("cogs")).unwrap();

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let reloader = Reloader::builder()
        .directory("cogs")
        .base_dir(&bot)
        .batch_window(BatchWindow::from_millis(200, 50))
        .hooks(RecordingHooks { tx })
        .build()
        .unwrap();
    let host = Arc::new(RecordingHost::new(&["cogs.music"]));

    reloader.start(host.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(shared.join("music.py"), "VOLUME = 2\n").unwrap();

    assert_eq!(
        next_outcome(&mut outcomes).await,
        Outcome::Reloaded("cogs.music".to_string())
    );
    reloader.stop();
    assert!(host.calls().iter().all(|c| c == "cogs.music"));
}
