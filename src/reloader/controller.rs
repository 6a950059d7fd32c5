//! The reload controller: lifecycle, watch loop and reload dispatch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::Settings;

use super::batcher::BatchWindow;
use super::hooks::{DefaultHooks, ReloadHooks};
use super::host::ExtensionHost;
use super::notify_source::NotifySource;
use super::resolver::{ExtensionId, PathConvention, Resolver};
use super::source::{ChangeFeed, ChangeKind, WatchSource};
use super::{HostError, ReloaderError};

/// Settings fixed at construction.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory holding the extensions.
    pub directory: PathBuf,
    /// Extensions that are never reloaded, in dotted form.
    pub excluded: HashSet<String>,
    /// Directory identifiers are resolved against.
    pub base_dir: PathBuf,
    /// File naming rules for identifier resolution.
    pub convention: PathConvention,
    /// Coalescing window of the default filesystem source.
    pub window: BatchWindow,
}

/// A running watch loop.
struct RunHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RunHandle {
    fn is_active(&self) -> bool {
        !self.stop.is_cancelled() && !self.task.is_finished()
    }
}

/// Watches an extension directory and reloads changed extensions.
///
/// ```ignore
/// let reloader = Reloader::new("cogs", ["cogs.owner"])?;
/// reloader.start(host.clone())?;
/// // ...
/// reloader.stop();
/// ```
///
/// Only modifications of extensions the host reports as loaded are acted
/// on. Each reload runs as its own task so a slow extension never holds up
/// the loop; outcomes go to the configured [`ReloadHooks`].
pub struct Reloader {
    config: WatchConfig,
    resolver: Resolver,
    source: Arc<dyn WatchSource>,
    hooks: Arc<dyn ReloadHooks>,
    run: Mutex<Option<RunHandle>>,
}

impl Reloader {
    /// Create a builder for configuring the reloader.
    pub fn builder() -> ReloaderBuilder {
        ReloaderBuilder::new()
    }

    /// Reloader for `directory` with default settings and hooks.
    pub fn new<I, S>(directory: impl Into<PathBuf>, excluded: I) -> Result<Self, ReloaderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().directory(directory).exclude(excluded).build()
    }

    /// Reloader configured from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Result<Self, ReloaderError> {
        settings.reloader_builder().build()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Whether no watch loop is currently active.
    pub fn stopped(&self) -> bool {
        self.run.lock().as_ref().is_none_or(|run| !run.is_active())
    }

    /// Start watching in the background.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// watch is established; the loop runs until [`stop`](Self::stop).
    pub fn start(&self, host: Arc<dyn ExtensionHost>) -> Result<(), ReloaderError> {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(RunHandle::is_active) {
            return Err(ReloaderError::AlreadyRunning);
        }
        if let Some(finished) = run.take() {
            finished.stop.cancel();
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ReloaderError::NoRuntime)?;

        let stop = CancellationToken::new();
        let feed = self.source.open(&self.config.directory, stop.clone())?;

        let watch_loop = WatchLoop {
            resolver: self.resolver.clone(),
            excluded: self.config.excluded.clone(),
            host,
            hooks: self.hooks.clone(),
        };
        let span = tracing::info_span!("reloader", dir = %self.config.directory.display());
        let task = runtime.spawn(watch_loop.run(feed).instrument(span));

        crate::log_event!("reloader", "started", "{}", self.config.directory.display());

        *run = Some(RunHandle { stop, task });
        Ok(())
    }

    /// Stop watching. Does nothing if not running.
    ///
    /// Reloads already dispatched are left to finish.
    pub fn stop(&self) {
        if let Some(run) = self.run.lock().take() {
            run.stop.cancel();
            run.task.abort();
            crate::log_event!("reloader", "stopped", "{}", self.config.directory.display());
        }
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("config", &self.config)
            .field("stopped", &self.stopped())
            .finish_non_exhaustive()
    }
}

/// State moved into the background task.
struct WatchLoop {
    resolver: Resolver,
    excluded: HashSet<String>,
    host: Arc<dyn ExtensionHost>,
    hooks: Arc<dyn ReloadHooks>,
}

impl WatchLoop {
    async fn run(self, mut feed: ChangeFeed) {
        while let Some(batch) = feed.next_batch().await {
            for change in batch {
                if feed.is_stopped() {
                    return;
                }

                if change.kind != ChangeKind::Modified {
                    continue;
                }

                if let Some(extension) = self.candidate(&change.path) {
                    crate::log_event!(
                        "reloader",
                        "detected changes",
                        "'{extension}', reloading"
                    );
                    self.dispatch(extension);
                }
            }
        }

        crate::debug_event!("reloader", "feed ended");
    }

    /// Resolve a modified path and apply the filters.
    fn candidate(&self, path: &Path) -> Option<ExtensionId> {
        let extension = self.resolver.resolve(path);

        if !self.host.is_loaded(&extension) {
            crate::debug_event!("reloader", "not loaded", "{extension}");
            return None;
        }
        if self.excluded.contains(extension.as_str()) {
            crate::debug_event!("reloader", "excluded", "{extension}");
            return None;
        }

        Some(extension)
    }

    fn dispatch(&self, extension: ExtensionId) {
        let host = self.host.clone();
        let hooks = self.hooks.clone();

        tokio::spawn(async move {
            if let Err(e) = reload_extension(host.as_ref(), hooks.as_ref(), &extension).await {
                tracing::error!(
                    "[reloader] unexpected host error reloading '{extension}': {}",
                    e.report()
                );
            }
        });
    }
}

/// Reload one extension and report the outcome.
///
/// Reload failures go to [`ReloadHooks::on_error`] and count as handled.
/// Any other host error is returned.
pub async fn reload_extension(
    host: &dyn ExtensionHost,
    hooks: &dyn ReloadHooks,
    extension: &ExtensionId,
) -> Result<(), HostError> {
    match host.reload(extension).await {
        Ok(()) => {
            crate::debug_event!("reloader", "reloaded", "{extension}");
            hooks.on_reload(extension).await;
            Ok(())
        }
        Err(e) if e.is_reload_failure() => {
            hooks.on_error(extension, &e).await;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Builder for constructing a [`Reloader`].
pub struct ReloaderBuilder {
    directory: Option<PathBuf>,
    excluded: HashSet<String>,
    base_dir: Option<PathBuf>,
    convention: PathConvention,
    window: BatchWindow,
    source: Option<Arc<dyn WatchSource>>,
    hooks: Option<Arc<dyn ReloadHooks>>,
}

impl ReloaderBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            directory: None,
            excluded: HashSet::new(),
            base_dir: None,
            convention: PathConvention::default(),
            window: BatchWindow::default(),
            source: None,
            hooks: None,
        }
    }

    /// Set the extension directory to watch. Required.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Add extensions that must never be reloaded.
    pub fn exclude<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(extensions.into_iter().map(Into::into));
        self
    }

    /// Set the directory identifiers are resolved against.
    ///
    /// Defaults to the current working directory.
    pub fn base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Set the file naming convention.
    pub fn convention(mut self, convention: PathConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Set the coalescing window of the default filesystem source.
    pub fn batch_window(mut self, window: BatchWindow) -> Self {
        self.window = window;
        self
    }

    /// Use a custom change source instead of watching the filesystem.
    pub fn source(mut self, source: impl WatchSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set the outcome hooks.
    pub fn hooks(mut self, hooks: impl ReloadHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Build the Reloader.
    pub fn build(self) -> Result<Reloader, ReloaderError> {
        let directory = self.directory.ok_or_else(|| ReloaderError::Config {
            reason: "extension directory is required".to_string(),
        })?;

        let given_base = self
            .base_dir
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        // Absolute watch paths come back from the OS in canonical form
        let base_dir = given_base
            .canonicalize()
            .unwrap_or_else(|_| given_base.clone());

        // The directory as named under the base; a symlink keeps its own name
        let named = if directory.is_absolute() {
            match directory.strip_prefix(&given_base).map(Path::to_path_buf) {
                Ok(rest) => base_dir.join(rest),
                Err(_) => directory,
            }
        } else {
            base_dir.join(&directory)
        };
        let directory = named.canonicalize().unwrap_or_else(|_| named.clone());

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(NotifySource::new(self.window)));
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(DefaultHooks));

        let config = WatchConfig {
            directory,
            excluded: self.excluded,
            base_dir,
            convention: self.convention,
            window: self.window,
        };

        let resolver = Resolver::new(config.base_dir.clone(), config.convention.clone())
            .with_watch_root(config.directory.clone(), named);

        Ok(Reloader {
            resolver,
            config,
            source,
            hooks,
            run: Mutex::new(None),
        })
    }
}

impl Default for ReloaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
