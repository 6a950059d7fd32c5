//! Automatic hot-reloading of extensions.
//!
//! A [`Reloader`] watches an extension directory and, whenever the source
//! file of a loaded extension is modified, asks the [`ExtensionHost`] to
//! reload it. Outcomes are reported through [`ReloadHooks`].

pub mod config;
pub mod logging;
pub mod reloader;

pub use config::{LoggingConfig, Settings, WatchSettings};
pub use reloader::{
    ChangeEvent, ChangeKind, ExtensionHost, ExtensionId, HostError, ReloadHooks, Reloader,
    ReloaderBuilder, ReloaderError, WatchSource, resolve,
};
