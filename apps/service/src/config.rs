use std::time::Duration;
use std::{env, fmt, fs, io, path};

use pulse::probe::DEFAULT_TIMEOUT_CEILING;
use pulse::{RetryPolicy, SchedulerConfig, WatcherConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("cannot write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("cannot parse {}: {source}", path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("cannot serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub scheduler: Scheduler,
    pub log_store: LogStore,
    pub registry: Registry,
    pub alerts: Alerts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub workers: usize,
    /// Upper bound of a probe timeout; shorter intervals get shorter timeouts
    pub timeout_ceiling_seconds: u64,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStore {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Change feed entries older than this are pruned
    pub event_retention_hours: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alerts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: path::PathBuf::from("pulse.db") }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            workers: defaults.workers,
            timeout_ceiling_seconds: DEFAULT_TIMEOUT_CEILING.as_secs(),
            shutdown_grace_seconds: defaults.shutdown_grace.as_secs(),
        }
    }
}

impl Default for LogStore {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: u64::try_from(defaults.initial_backoff.as_millis()).unwrap_or(200),
            max_backoff_ms: u64::try_from(defaults.max_backoff.as_millis()).unwrap_or(5_000),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        let defaults = WatcherConfig::default();
        Self {
            poll_interval_ms: u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(1_000),
            batch_size: defaults.batch_size,
            event_retention_hours: 24 * 7,
        }
    }
}

impl Scheduler {
    pub fn engine_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers.max(1),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
            ..SchedulerConfig::default()
        }
    }

    pub fn timeout_ceiling(&self) -> Duration {
        Duration::from_secs(self.timeout_ceiling_seconds.max(1))
    }
}

impl LogStore {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }
}

impl Registry {
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            batch_size: self.batch_size.max(1),
        }
    }

    pub fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_hours.saturating_mul(3600))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().is_none_or(|ext| ext != "toml") {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulse/service.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulse/service.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_1 = |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
            writeln!(f, "    {label}: {value}")
        };
        let title = |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "  {label}");

        writeln!(f, "Current Internal Configuration State:")?;
        title(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        title(f, "Scheduler")?;
        write_1(f, "Workers", &self.scheduler.workers)?;
        write_1(f, "Timeout Ceiling (s)", &self.scheduler.timeout_ceiling_seconds)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        title(f, "Log Store")?;
        write_1(f, "Max Attempts", &self.log_store.max_attempts)?;
        write_1(f, "Initial Backoff (ms)", &self.log_store.initial_backoff_ms)?;
        write_1(f, "Max Backoff (ms)", &self.log_store.max_backoff_ms)?;
        title(f, "Registry")?;
        write_1(f, "Poll Interval (ms)", &self.registry.poll_interval_ms)?;
        write_1(f, "Batch Size", &self.registry.batch_size)?;
        write_1(f, "Event Retention (h)", &self.registry.event_retention_hours)?;
        title(f, "Alerts")?;
        // The webhook url is a credential
        let slack = if self.alerts.slack_webhook_url.is_some() { "configured" } else { "disabled" };
        write_1(f, "Slack", &slack)?;

        Ok(())
    }
}

impl Config {
    /// Load the config at `optional_path`, or at the default location.
    ///
    /// A missing file is created with the defaults.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path = match optional_path {
            Some(path) => normalize_toml_path(path.as_ref()),
            None => default_config_path()?,
        };

        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(&raw).map_err(|source| Error::ParseFailed { path: config_path, source })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}
