use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::due::{DueResolver, Zone};
use crate::logging::LogConfig;
use crate::reconcile::ReconcileConfig;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "REMINDUST_HOME";
/// Optional settings file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be between 0 and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        max: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneSetting {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding tasks, the reminder index and pending triggers.
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Zone in which task dates and times are read.
    pub zone: ZoneSetting,
    /// Time of day used for tasks that only have a date.
    pub default_due_time: NaiveTime,
    /// Answer the local notifier gives to permission requests.
    pub notifications_enabled: bool,
    /// Upper bound the CLI puts on each engine call.
    pub os_call_timeout_ms: u64,
    pub reconcile: ReconcileConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            zone: ZoneSetting::Local,
            default_due_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            notifications_enabled: true,
            os_call_timeout_ms: 5_000,
            reconcile: ReconcileConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads settings for the data directory picked by [`default_data_dir`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(default_data_dir())
    }

    /// Loads `config.toml` from `data_dir`, falling back to defaults.
    pub fn load_from(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(s) => toml::from_str::<Config>(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.validate()?;
        config.data_dir = data_dir;
        Ok(config)
    }

    /// Rejects thresholds that cannot be turned into a time span.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconcile;
        check_range("reconcile.fire_tolerance_secs", r.fire_tolerance_secs, ReconcileConfig::MAX_TOLERANCE_SECS)?;
        check_range("reconcile.expired_grace_hours", r.expired_grace_hours, ReconcileConfig::MAX_GRACE_HOURS)?;
        check_range("reconcile.history_retention_days", r.history_retention_days, ReconcileConfig::MAX_RETENTION_DAYS)?;
        let timeout = i64::try_from(self.os_call_timeout_ms).unwrap_or(i64::MAX);
        check_range("os_call_timeout_ms", timeout, MAX_TIMEOUT_MS)
    }

    /// Defaults rooted at `data_dir`, ignoring any config file.
    pub fn for_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn due_resolver(&self) -> DueResolver {
        let zone = match self.zone {
            ZoneSetting::Local => Zone::Local,
            ZoneSetting::Utc => Zone::Utc,
        };
        DueResolver::new(zone, self.default_due_time)
    }

    pub fn os_call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.os_call_timeout_ms)
    }
}

const MAX_TIMEOUT_MS: i64 = 3_600_000;

fn check_range(field: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, max })
    }
}

/// Returns the data directory.
///
/// The path is determined in the following order:
/// 1. `REMINDUST_HOME` environment variable.
/// 2. `~/.local/share/remindust` (on Linux).
/// 3. `.` (fallback).
pub fn default_data_dir() -> PathBuf {
    std::env::var(HOME_ENV).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|p| p.join("remindust"))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}
