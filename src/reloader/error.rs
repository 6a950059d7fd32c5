//! Error types for the reloader.

use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Cause of a failed reload, with its own source chain intact.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors from reloader setup and lifecycle operations.
#[derive(Error, Debug)]
pub enum ReloaderError {
    #[error("Reloader is already running")]
    AlreadyRunning,

    #[error("Reloader must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("Extension directory does not exist: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Change feed was already consumed and cannot be reopened")]
    SourceExhausted,

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<notify::Error> for ReloaderError {
    fn from(e: notify::Error) -> Self {
        ReloaderError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors reported by an [`ExtensionHost`](super::ExtensionHost) reload.
///
/// `ReloadFailed` is the recoverable kind: the reloader hands it to
/// [`ReloadHooks::on_error`](super::ReloadHooks::on_error) and keeps going.
/// Anything else is `Unexpected` and ends the reload attempt with that error.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Extension '{extension}' failed to reload")]
    ReloadFailed {
        extension: String,
        #[source]
        cause: BoxError,
    },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl HostError {
    /// Build a reload failure for `extension`.
    ///
    /// Accepts a message or any error, including `anyhow::Error`; the cause
    /// chain stays reachable through [`source`](StdError::source).
    pub fn reload_failed(extension: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        HostError::ReloadFailed {
            extension: extension.into(),
            cause: cause.into(),
        }
    }

    /// The message followed by every cause, `outer: inner: root`.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            report.push_str(": ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }

    /// Whether this is the recoverable reload-failure kind.
    pub fn is_reload_failure(&self) -> bool {
        matches!(self, HostError::ReloadFailed { .. })
    }
}
