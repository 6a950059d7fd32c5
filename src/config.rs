//! Layered configuration for the reloader.
//!
//! Sources, lowest to highest precedence:
//! - Default values
//! - TOML configuration file (`.autoreload/settings.toml`)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `AUTORELOAD_` and use double
//! underscores to separate nested levels:
//! - `AUTORELOAD_WATCH__DIRECTORY=extensions` sets `watch.directory`
//! - `AUTORELOAD_WATCH__DEBOUNCE_MS=500` sets `watch.debounce_ms`
//! - `AUTORELOAD_LOGGING__DEFAULT=info` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::reloader::{BatchWindow, PathConvention, ReloaderBuilder};

const CONFIG_DIR: &str = ".autoreload";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "AUTORELOAD_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// What to watch and how to batch changes
    #[serde(default)]
    pub watch: WatchSettings,

    /// How file paths map to extension names
    #[serde(default)]
    pub convention: PathConvention,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchSettings {
    /// Directory holding the extensions
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Extensions that are never reloaded, in dotted form
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Directory extension names are resolved against
    /// (defaults to the directory containing `.autoreload`, or the current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// Longest time a batch of changes is held open
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Quiet time after which a batch is delivered early
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `autoreload = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_directory() -> PathBuf {
    PathBuf::from("cogs")
}
fn default_debounce_ms() -> u64 {
    1600
}
fn default_step_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchSettings::default(),
            convention: PathConvention::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            exclude: Vec::new(),
            base_dir: None,
            debounce_ms: default_debounce_ms(),
            step_ms: default_step_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// The settings file is looked up from the current directory upwards.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path =
            Self::find_workspace_config().unwrap_or_else(|| Path::new(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.watch.base_dir.is_none() {
                    settings.watch.base_dir = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file (plus defaults and environment).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore
            // stays part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a `.autoreload` directory from
    /// the current directory up to the root.
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// The directory containing `.autoreload`, if any.
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Coalescing window for filesystem events.
    pub fn batch_window(&self) -> BatchWindow {
        BatchWindow::from_millis(self.watch.debounce_ms, self.watch.step_ms)
    }

    /// A reloader builder preconfigured from these settings.
    pub fn reloader_builder(&self) -> ReloaderBuilder {
        let mut builder = ReloaderBuilder::new()
            .directory(self.watch.directory.clone())
            .exclude(self.watch.exclude.iter().cloned())
            .convention(self.convention.clone())
            .batch_window(self.batch_window());

        if let Some(base_dir) = &self.watch.base_dir {
            builder = builder.base_dir(base_dir.clone());
        }
        builder
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = Path::new(CONFIG_DIR).join(CONFIG_FILE);
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
