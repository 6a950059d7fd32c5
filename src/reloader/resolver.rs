//! Mapping of changed file paths to dotted extension identifiers.
//!
//! A file at `cogs/admin/roles.py` resolves to `cogs.admin.roles`, and a
//! package entry point `cogs/admin/__init__.py` resolves to the package
//! itself, `cogs.admin`.
//!
//! An extension whose own last segment is literally named like the package
//! initializer (`cogs/admin/__init__` loaded as `cogs.admin.__init__`) cannot
//! be told apart from a package entry point and loses that segment.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Dotted name of a loadable extension, e.g. `cogs.music`.
///
/// Only produced by resolving a path; hosts and hooks receive it by
/// reference and can compare it against plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(String);

impl ExtensionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExtensionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ExtensionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ExtensionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ExtensionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// File naming rules of the extension directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConvention {
    /// Source file suffix stripped from the leaf module.
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Package entry point name, dropped wherever it appears.
    #[serde(default = "default_init_name")]
    pub init_name: String,
}

fn default_suffix() -> String {
    ".py".to_string()
}

fn default_init_name() -> String {
    "__init__".to_string()
}

impl Default for PathConvention {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            init_name: default_init_name(),
        }
    }
}

/// Resolve `path` relative to `base` into an extension identifier.
///
/// Paths outside `base` are used as given. `..` is applied lexically. Both `/` and `\` separate
/// components so the result does not depend on the platform that produced
/// the path.
pub fn resolve_from(base: &Path, path: &Path, convention: &PathConvention) -> ExtensionId {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let normalized = relative.to_string_lossy().replace('\\', "/");

    let mut components: Vec<&str> = Vec::new();
    for component in normalized.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            component => components.push(component),
        }
    }

    if let Some(leaf) = components.pop() {
        components.push(leaf.strip_suffix(convention.suffix.as_str()).unwrap_or(leaf));
    }

    let name = components
        .into_iter()
        .filter(|c| !c.is_empty() && *c != convention.init_name)
        .collect::<Vec<_>>()
        .join(".");

    ExtensionId(name)
}

/// Resolve `path` relative to the current working directory using the
/// default convention.
pub fn resolve(path: impl AsRef<Path>) -> ExtensionId {
    let base = std::env::current_dir().unwrap_or_default();
    resolve_from(&base, path.as_ref(), &PathConvention::default())
}

/// Resolver bound to a base directory and convention.
#[derive(Debug, Clone)]
pub struct Resolver {
    base: PathBuf,
    convention: PathConvention,
    /// Watched directory as reported by the OS, and the path it is named by.
    watch_root: Option<(PathBuf, PathBuf)>,
}

impl Resolver {
    pub fn new(base: PathBuf, convention: PathConvention) -> Self {
        Self {
            base,
            convention,
            watch_root: None,
        }
    }

    /// Name paths under `watched` as if they were under `named`.
    ///
    /// The OS reports changes below the real location of a directory, so a
    /// symlinked extension directory has to be mapped back before resolving.
    pub fn with_watch_root(mut self, watched: PathBuf, named: PathBuf) -> Self {
        self.watch_root = (watched != named).then_some((watched, named));
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn convention(&self) -> &PathConvention {
        &self.convention
    }

    pub fn resolve(&self, path: &Path) -> ExtensionId {
        if let Some((watched, named)) = &self.watch_root
            && let Ok(rest) = path.strip_prefix(watched)
        {
            return resolve_from(&self.base, &named.join(rest), &self.convention);
        }
        resolve_from(&self.base, path, &self.convention)
    }
}
