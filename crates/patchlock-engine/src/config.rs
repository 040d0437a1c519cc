use serde::{Deserialize, Serialize};

use crate::status::BackpressurePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Status change notification channel
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Work queue and workers of each patch controller
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.notifications.capacity == 0 {
            return Err("notifications.capacity must be > 0".into());
        }
        if self.controller.workers == 0 {
            return Err("controller.workers must be > 0".into());
        }
        if self.controller.base_backoff_ms == 0 {
            return Err("controller.base_backoff_ms must be > 0".into());
        }
        if self.controller.base_backoff_ms > self.controller.max_backoff_ms {
            return Err("controller.base_backoff_ms must be <= controller.max_backoff_ms".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Bounded capacity of the status change channel.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// What a reconcile does when the channel is full.
    #[serde(default)]
    pub policy: BackpressurePolicy,
}

fn default_capacity() -> usize {
    64
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            policy: BackpressurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_workers() -> usize {
    1
}
fn default_base_backoff_ms() -> u64 {
    5
}
fn default_max_backoff_ms() -> u64 {
    1_000_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::EngineConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("patchlock.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., PATCHLOCK__CONTROLLER__WORKERS=4
        builder = builder.add_source(
            Environment::with_prefix("PATCHLOCK")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: EngineConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<EngineConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.notifications.capacity, 64);
        assert_eq!(config.notifications.policy, BackpressurePolicy::Block);
        assert_eq!(config.controller.workers, 1);
        assert_eq!(config.controller.base_backoff_ms, 5);
        assert_eq!(config.controller.max_backoff_ms, 1_000_000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[notifications]
capacity = 8
policy = "fail_fast"

[controller]
workers = 2
base_backoff_ms = 10

[logging]
level = "debug"
"#,
        );
        let config = loader::load_config_with_default_path(Some(file.path())).unwrap();
        assert_eq!(config.notifications.capacity, 8);
        assert_eq!(config.notifications.policy, BackpressurePolicy::FailFast);
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.base_backoff_ms, 10);
        assert_eq!(config.controller.max_backoff_ms, 1_000_000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config("[notifications]\ncapacity = 0\n");
        let err = loader::load_config_with_default_path(Some(file.path())).unwrap_err();
        assert!(err.contains("notifications.capacity"));

        let file = write_config("[controller]\nbase_backoff_ms = 50\nmax_backoff_ms = 10\n");
        let err = loader::load_config_with_default_path(Some(file.path())).unwrap_err();
        assert!(err.contains("max_backoff_ms"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().unwrap_err().contains("logging.level"));
    }
}
