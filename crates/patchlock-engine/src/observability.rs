//! Tracing setup for processes embedding the engine.
//!
//! The engine itself only emits `tracing` events and spans; installing a
//! subscriber is up to the host. These helpers install a registry with a
//! reloadable [`EnvFilter`] so the level can follow configuration changes.

use std::sync::{Mutex, OnceLock};

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();
static CURRENT_LEVEL: Mutex<Option<String>> = Mutex::new(None);

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(filter);
    if LOG_RELOAD_HANDLE.set(handle).is_err() {
        return;
    }
    remember_level(level);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Installs the global subscriber from the `[logging]` section.
pub fn init_tracing(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

/// Changes the active level. Returns false if tracing was not initialized
/// here or the filter could not be swapped.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return false;
    };
    let applied = handle.modify(|f| *f = EnvFilter::new(level)).is_ok();
    if applied {
        remember_level(level);
        tracing::info!(level, "Logging level changed");
    }
    applied
}

/// Level most recently installed through this module.
pub fn current_logging_level() -> Option<String> {
    CURRENT_LEVEL
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

fn remember_level(level: &str) {
    *CURRENT_LEVEL
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(level.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_follows_init() {
        init_tracing(&LoggingConfig {
            level: "warn".into(),
        });
        assert!(apply_logging_level("debug"));
        assert_eq!(current_logging_level().as_deref(), Some("debug"));
    }
}
