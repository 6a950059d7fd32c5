//! Automatic reloading of extensions whose source files change.
//!
//! # Architecture
//!
//! ```text
//! WatchSource (NotifySource / ChannelSource)
//!   - batches of ChangeEvent, ends on stop token
//!         |
//! Reloader (background watch loop)
//!   - modified only -> resolve path -> loaded? -> excluded?
//!         |
//!   spawned reload task per extension
//!         |
//! ExtensionHost::reload -> ReloadHooks::on_reload / on_error
//! ```

mod batcher;
mod controller;
mod error;
mod hooks;
mod host;
mod notify_source;
mod resolver;
mod source;

pub use batcher::{BatchWindow, Batcher};
pub use controller::{Reloader, ReloaderBuilder, WatchConfig, reload_extension};
pub use error::{BoxError, HostError, ReloaderError};
pub use hooks::{DefaultHooks, ReloadHooks};
pub use host::ExtensionHost;
pub use notify_source::NotifySource;
pub use resolver::{ExtensionId, PathConvention, Resolver, resolve, resolve_from};
pub use source::{BatchSender, ChangeEvent, ChangeFeed, ChangeKind, ChannelSource, WatchSource};
