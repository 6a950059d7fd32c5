//! Outcome hooks invoked after each reload attempt.

use async_trait::async_trait;

use super::{ExtensionId, HostError};

/// Callbacks for reload outcomes.
///
/// Both methods have defaults, so an implementation only overrides what it
/// needs:
///
/// ```ignore
/// struct Announce(tokio::sync::mpsc::UnboundedSender<String>);
///
/// #[async_trait]
/// impl ReloadHooks for Announce {
///     async fn on_reload(&self, extension: &ExtensionId) {
///         let _ = self.0.send(format!("reloaded {extension}"));
///     }
/// }
/// ```
#[async_trait]
pub trait ReloadHooks: Send + Sync {
    /// Called after `extension` was reloaded successfully. Does nothing by
    /// default.
    async fn on_reload(&self, _extension: &ExtensionId) {}

    /// Called when reloading `extension` failed.
    ///
    /// The default logs the failure with its whole cause chain. This must not
    /// panic; the error is considered handled once this returns.
    async fn on_error(&self, extension: &ExtensionId, error: &HostError) {
        tracing::error!(
            "[reloader] ignoring error while auto reloading '{extension}': {}",
            error.report()
        );
    }
}

/// Hooks with the default behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ReloadHooks for DefaultHooks {}
