//! The extension host collaborator.

use async_trait::async_trait;

use super::{ExtensionId, HostError};

/// The process that owns the loaded extensions.
///
/// The reloader only asks whether an extension is loaded and requests
/// reloads; it never loads or unloads anything itself. `reload` may be
/// called concurrently for the same extension when its file changes in
/// quick succession, so implementations must tolerate overlapping calls.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Whether `extension` is currently loaded.
    fn is_loaded(&self, extension: &ExtensionId) -> bool;

    /// Reload `extension` in place.
    ///
    /// Return [`HostError::ReloadFailed`] when the extension itself could not
    /// be reloaded (e.g. it raised during setup). Any other failure should be
    /// [`HostError::Unexpected`].
    async fn reload(&self, extension: &ExtensionId) -> Result<(), HostError>;
}
