use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from resticwatch.toml.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
#[derive(Default)]
pub struct MonitorConfig {
    pub service: ServiceConfig,
    pub journal: JournalConfig,
    pub indicator: IndicatorConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
#[derive(Default)]
pub struct ServiceConfig {
    /// Backup name used to build restic-backups-{name}.service.
    /// Empty means "use the hostname".
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JournalConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndicatorConfig {
    /// How long the indicator stays visible after a completed backup.
    pub hide_delay_ms: u64,
    /// Where to mirror indicator state for a host widget. None = log only.
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub command: String,
    pub enabled: bool,
}

// --- Default implementations ---

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            command: "journalctl".to_string(),
            args: vec![
                "-f".to_string(),
                "-u".to_string(),
                "{unit}".to_string(),
                "-n0".to_string(),
                "-o".to_string(),
                "cat".to_string(),
            ],
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            hide_delay_ms: 2000,
            status_file: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            command: "notify-send".to_string(),
            enabled: true,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
