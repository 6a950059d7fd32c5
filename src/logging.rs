//! Tracing subscriber setup and the `[component] event` macros.
//!
//! Levels come from `[logging]` in the settings file unless `RUST_LOG` is
//! set, e.g. `RUST_LOG=autoreload=debug`.

use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Wall-clock time of day with milliseconds.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `default,module=level,...` with modules in a stable order.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    std::iter::once(config.default.clone())
        .chain(modules.into_iter().map(|(module, level)| format!("{module}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(filter_directives(config)),
    }
}

/// Install the global subscriber.
///
/// Only the first call has an effect, and a subscriber the embedding
/// application installed earlier is left in place.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_timer(ClockTime)
            .with_filter(env_filter(config));

        let _ = tracing_subscriber::registry().with(layer).try_init();
    });
}

/// Install the global subscriber at the default `warn` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

#[doc(hidden)]
#[macro_export]
macro_rules! __component_event {
    ($level:ident, $component:expr, $event:expr) => {
        tracing::$level!("[{}] {}", $component, $event)
    };
    ($level:ident, $component:expr, $event:expr, $($arg:tt)+) => {
        tracing::$level!("[{}] {}: {}", $component, $event, format!($($arg)+))
    };
}

/// Info-level event, `[component] event: detail`.
///
/// ```ignore
/// log_event!("reloader", "started", "{}", dir.display());
/// ```
#[macro_export]
macro_rules! log_event {
    ($($args:tt)+) => {
        $crate::__component_event!(info, $($args)+)
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($($args:tt)+) => {
        $crate::__component_event!(debug, $($args)+)
    };
}
