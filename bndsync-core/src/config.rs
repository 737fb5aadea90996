use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log_sink::DEFAULT_LOG_CAP;
use crate::progress::DEFAULT_LABEL_BUDGET;

pub const CONFIG_ENV: &str = "BNDSYNC_CONFIG";
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 10;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub fn default_build_file_extensions() -> Vec<String> {
    vec!["build".into(), "bnd".into(), "yml".into()]
}

/// Periodic `empty_gags` invocation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DrainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_drain_interval")]
    pub interval_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
        }
    }
}

impl DrainConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// File and directory dialog settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PickerConfig {
    #[serde(default = "default_build_file_extensions")]
    pub build_file_extensions: Vec<String>,
    /// Answer to "open build file" requests in headless runs
    #[serde(default)]
    pub default_build_file: Option<String>,
    /// Answer to "select working directory" requests in headless runs
    #[serde(default)]
    pub default_directory: Option<String>,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            build_file_extensions: default_build_file_extensions(),
            default_build_file: None,
            default_directory: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_drain_interval() -> u64 {
    DEFAULT_DRAIN_INTERVAL_MS
}
fn default_log_cap() -> usize {
    DEFAULT_LOG_CAP
}
fn default_label_budget() -> usize {
    DEFAULT_LABEL_BUDGET
}
fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SyncConfig {
    /// Line cap of each log buffer
    #[serde(default = "default_log_cap")]
    pub log_cap: usize,

    /// Characters of the last started rule shown next to the progress bar
    #[serde(default = "default_label_budget")]
    pub progress_label_budget: usize,

    /// Capacity of the engine event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub drain: DrainConfig,

    #[serde(default)]
    pub picker: PickerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            log_cap: DEFAULT_LOG_CAP,
            progress_label_budget: DEFAULT_LABEL_BUDGET,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            drain: DrainConfig::default(),
            picker: PickerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },
    #[error("progress label budget must be at least 4, got {0}")]
    LabelBudget(usize),
    #[error("build file extension '{0}' must not be empty or start with a dot")]
    Extension(String),
    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        // an empty file is a valid, all-default config
        let config: SyncConfig = if content.trim().is_empty() {
            SyncConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Look for `$BNDSYNC_CONFIG`, then `bndsync.yml` in `start_dir` and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let names = ["bndsync.yml", "bndsync.yaml", ".bndsync.yml"];
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((path, config));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &names {
                let path = current.join(name);
                if path.exists() {
                    let config = Self::load(&path)?;
                    return Ok((path, config));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Like [`SyncConfig::discover`], falling back to defaults when no file exists
    pub fn discover_or_default(start_dir: &Path) -> Result<(Option<PathBuf>, Self), ConfigError> {
        match Self::discover(start_dir) {
            Ok((path, config)) => Ok((Some(path), config)),
            Err(ConfigError::NotFound { .. }) => Ok((None, Self::default())),
            Err(e) => Err(e),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_cap == 0 {
            return Err(ConfigError::Zero { field: "log_cap" });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "channel_capacity",
            });
        }
        if self.drain.enabled && self.drain.interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "drain.interval_ms",
            });
        }
        // room for the "..." prefix plus one character
        if self.progress_label_budget < 4 {
            return Err(ConfigError::LabelBudget(self.progress_label_budget));
        }
        for ext in &self.picker.build_file_extensions {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(ConfigError::Extension(ext.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
log_cap: 500
progress_label_budget: 16
drain:
  interval_ms: 25
picker:
  build_file_extensions: [build]
  default_build_file: demo.build
"#;
        let config = SyncConfig::from_str(yaml).unwrap();
        assert_eq!(config.log_cap, 500);
        assert_eq!(config.progress_label_budget, 16);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.drain.enabled);
        assert_eq!(config.drain.interval(), Duration::from_millis(25));
        assert_eq!(config.picker.build_file_extensions, vec!["build".to_string()]);
        assert_eq!(config.picker.default_build_file.as_deref(), Some("demo.build"));
        assert_eq!(config.picker.default_directory, None);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = SyncConfig::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.log_cap, 2000);
        assert_eq!(config.progress_label_budget, 10);
        assert_eq!(config.drain.interval_ms, 10);
        assert_eq!(config.picker.build_file_extensions, ["build", "bnd", "yml"]);
    }

    #[test]
    fn test_zero_log_cap_rejected() {
        let result = SyncConfig::from_str("log_cap: 0\n");
        assert!(matches!(result, Err(ConfigError::Zero { field: "log_cap" })));
    }

    #[test]
    fn test_disabled_drain_ignores_interval() {
        let yaml = "drain:\n  enabled: false\n  interval_ms: 0\n";
        let config = SyncConfig::from_str(yaml).unwrap();
        assert!(!config.drain.enabled);
    }

    #[test]
    fn test_dotted_extension_rejected() {
        let yaml = "picker:\n  build_file_extensions: [\".bnd\"]\n";
        assert!(matches!(
            SyncConfig::from_str(yaml),
            Err(ConfigError::Extension(ext)) if ext == ".bnd"
        ));
    }

    #[test]
    fn test_tiny_label_budget_rejected() {
        assert!(matches!(
            SyncConfig::from_str("progress_label_budget: 3\n"),
            Err(ConfigError::LabelBudget(3))
        ));
    }
}
