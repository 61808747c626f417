use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::retention::RetentionPolicy;
use crate::monitoring::validation::{IntervalBounds, MAX_INTERVAL, MIN_INTERVAL};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub checkers: CheckersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// libsql database file
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long shutdown waits for in-flight checks
    pub shutdown_grace_seconds: u64,
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
    /// Upper bound for a single check's timeout
    pub max_check_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days to keep heartbeats, 0 keeps them forever
    pub keep_days: i64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckersConfig {
    pub user_agent: String,
    pub remote_probe_api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_probe_token: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_data_dir().join("engine.db"), pool_size: 8 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_seconds: 10,
            min_interval_seconds: MIN_INTERVAL.as_secs(),
            max_interval_seconds: MAX_INTERVAL.as_secs(),
            max_check_timeout_seconds: 300,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_days: 180, cleanup_interval_seconds: 3600 }
    }
}

impl Default for CheckersConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("uptime-engine/{}", env!("CARGO_PKG_VERSION")),
            remote_probe_api_url: "https://api.globalping.io/".into(),
            remote_probe_token: None,
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn bounds(&self) -> IntervalBounds {
        IntervalBounds {
            min_interval: Duration::from_secs(self.min_interval_seconds),
            max_interval: Duration::from_secs(self.max_interval_seconds),
            max_timeout: Duration::from_secs(self.max_check_timeout_seconds),
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_days: self.keep_days,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_seconds.max(1)),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptime-engine/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uptime-engine/config.toml"))
}

/// $XDG_DATA_HOME/uptime-engine, $HOME/.local/share/uptime-engine or the working directory
fn default_data_dir() -> path::PathBuf {
    if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home).join("uptime-engine")
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share/uptime-engine")
    } else {
        path::PathBuf::from(".")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        write_1(f, "Min Interval (s)", &self.scheduler.min_interval_seconds)?;
        write_1(f, "Max Interval (s)", &self.scheduler.max_interval_seconds)?;
        write_1(f, "Max Check Timeout (s)", &self.scheduler.max_check_timeout_seconds)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Keep Days", &self.retention.keep_days)?;
        write_1(f, "Cleanup Interval (s)", &self.retention.cleanup_interval_seconds)?;

        write_title_1(f, "Checkers")?;
        write_1(f, "User Agent", &self.checkers.user_agent)?;
        write_1(f, "Remote Probe API", &self.checkers.remote_probe_api_url)?;
        write_1(
            f,
            "Remote Probe Token",
            &if self.checkers.remote_probe_token.is_some() { "set" } else { "not set" },
        )?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptime-engine/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}
