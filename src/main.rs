use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use autoreload::reloader::{DefaultHooks, resolve_from};
use autoreload::{ExtensionHost, ExtensionId, HostError, ReloadHooks, Settings};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoreload")]
#[command(about = "Watch an extension directory and hot-reload changed extensions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .autoreload/settings.toml in the current directory
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Print the extension name each path resolves to
    Resolve {
        /// Paths to resolve
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Watch the extension directory and report what would be reloaded
    Watch {
        /// Extension directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Extensions never to reload (adds to config)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Extensions to treat as loaded
        #[arg(short, long, required = true)]
        loaded: Vec<String>,
    },
}

/// Host that only pretends to reload.
struct DryRunHost {
    loaded: HashSet<String>,
}

#[async_trait]
impl ExtensionHost for DryRunHost {
    fn is_loaded(&self, extension: &ExtensionId) -> bool {
        self.loaded.contains(extension.as_str())
    }

    async fn reload(&self, _extension: &ExtensionId) -> Result<(), HostError> {
        Ok(())
    }
}

struct PrintHooks;

#[async_trait]
impl ReloadHooks for PrintHooks {
    async fn on_reload(&self, extension: &ExtensionId) {
        println!("reloaded {extension}");
    }

    async fn on_error(&self, extension: &ExtensionId, error: &HostError) {
        DefaultHooks.on_error(extension, error).await;
        eprintln!("failed to reload {extension}: {}", error.report());
    }
}

/// Canonical form of `path`, or `path` itself when it cannot be resolved.
fn canonical_or_given(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap_or(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load().map_err(|e| anyhow!("failed to load configuration: {e}"))?;
    autoreload::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
            println!("Created configuration at: {}", path.display());
        }

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Resolve { paths } => {
            let base = match &settings.watch.base_dir {
                Some(base) => base.clone(),
                None => std::env::current_dir()?,
            };
            let base = canonical_or_given(base);
            for path in paths {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    std::env::current_dir()?.join(&path)
                };
                let absolute = canonical_or_given(absolute);
                let extension = resolve_from(&base, &absolute, &settings.convention);
                println!("{} -> {extension}", path.display());
            }
        }

        Commands::Watch { dir, exclude, loaded } => {
            if let Some(dir) = dir {
                settings.watch.directory = dir;
            }
            settings.watch.exclude.extend(exclude);

            let reloader = settings.reloader_builder().hooks(PrintHooks).build()?;
            let host = Arc::new(DryRunHost {
                loaded: loaded.into_iter().collect(),
            });

            reloader.start(host)?;
            println!(
                "Watching {} (Ctrl-C to stop)",
                reloader.config().directory.display()
            );

            tokio::signal::ctrl_c().await?;
            reloader.stop();
        }
    }

    Ok(())
}
