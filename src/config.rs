//! Application-level configuration loading: schedule, timezone and storage backend.

use std::{env, fmt, fs, io, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;
use time::{Time, macros::format_description};
use time_tz::{Tz, timezones};
use tracing::info;

/// Default location on disk where the service looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/league-jobs.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LEAGUE_JOBS_CONFIG_PATH";
/// Zone whose calendar defines "yesterday" for the reconciler.
const DEFAULT_TIMEZONE: &str = "America/New_York";
/// Local wall-clock time of the daily reconciliation run.
const DEFAULT_RUN_AT: &str = "00:01";
/// Reason stored on game nights closed by the reconciler.
pub const DEFAULT_AUTO_COMPLETED_REASON: &str =
    "Automatically marked as not completed: game night was still live after midnight";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";
const DEFAULT_MONGO_DB: &str = "league";

/// Failures raised while assembling [`AppConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config `{path}`")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid JSON for [`RawConfig`].
    #[error("failed to parse config `{path}`")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },
    /// The timezone is not in the IANA database.
    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),
    /// The run time is not `HH:MM`.
    #[error("invalid run time `{value}`, expected HH:MM")]
    InvalidRunAt {
        /// Offending value.
        value: String,
        /// Underlying parse failure.
        #[source]
        source: time::error::Parse,
    },
    /// `STORE_BACKEND` names an unknown backend.
    #[error("unknown store backend `{0}`, expected `mongo` or `memory`")]
    UnknownBackend(String),
    /// `PORT` is not a valid port number.
    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

/// Which document store the jobs talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    /// MongoDB replica set.
    Mongo {
        /// Connection string.
        uri: String,
        /// Database holding the league collections.
        database: String,
    },
    /// Process-local store, empty on start.
    Memory,
}

/// Immutable runtime configuration shared across the application.
#[derive(Clone)]
pub struct AppConfig {
    store: StoreSettings,
    timezone: &'static Tz,
    timezone_name: String,
    run_at: Time,
    auto_completed_reason: String,
    port: u16,
}

impl AppConfig {
    /// Load the configuration file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = resolve_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<RawConfig>(&contents)
                .map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                RawConfig::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config = Self::from_sources(raw, |key| env::var(key).ok())?;
        info!(
            timezone = %config.timezone_name,
            run_at = %config.run_at,
            store = ?config.store,
            "loaded configuration"
        );
        Ok(config)
    }

    /// Combine file values with environment lookups, validating both.
    pub fn from_sources(
        raw: RawConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let timezone_name = raw.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_owned());
        let timezone = timezones::get_by_name(&timezone_name)
            .ok_or_else(|| ConfigError::UnknownTimezone(timezone_name.clone()))?;

        let run_at_value = raw.run_at.unwrap_or_else(|| DEFAULT_RUN_AT.to_owned());
        let run_at = Time::parse(&run_at_value, format_description!("[hour]:[minute]")).map_err(
            |source| ConfigError::InvalidRunAt {
                value: run_at_value.clone(),
                source,
            },
        )?;

        let store = match env("STORE_BACKEND").as_deref().unwrap_or("mongo") {
            "mongo" => StoreSettings::Mongo {
                uri: env("MONGO_URI").unwrap_or_else(|| DEFAULT_MONGO_URI.to_owned()),
                database: env("MONGO_DB").unwrap_or_else(|| DEFAULT_MONGO_DB.to_owned()),
            },
            "memory" => StoreSettings::Memory,
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        };

        let port = match env("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(value.clone()))?,
            None => raw.port.unwrap_or(DEFAULT_PORT),
        };

        Ok(Self {
            store,
            timezone,
            timezone_name,
            run_at,
            auto_completed_reason: raw
                .auto_completed_reason
                .unwrap_or_else(|| DEFAULT_AUTO_COMPLETED_REASON.to_owned()),
            port,
        })
    }

    /// Storage backend settings.
    pub fn store(&self) -> &StoreSettings {
        &self.store
    }

    /// Zone whose calendar defines "yesterday".
    pub fn timezone(&self) -> &'static Tz {
        self.timezone
    }

    /// IANA name of [`AppConfig::timezone`].
    pub fn timezone_name(&self) -> &str {
        &self.timezone_name
    }

    /// Local time of the daily reconciliation run.
    pub fn run_at(&self) -> Time {
        self.run_at
    }

    /// Reason stored on auto-closed game nights.
    pub fn auto_completed_reason(&self) -> &str {
        &self.auto_completed_reason
    }

    /// HTTP listen port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("store", &self.store)
            .field("timezone", &self.timezone_name)
            .field("run_at", &self.run_at)
            .field("auto_completed_reason", &self.auto_completed_reason)
            .field("port", &self.port)
            .finish()
    }
}

/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawConfig {
    /// IANA timezone name.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Daily run time, `HH:MM`.
    #[serde(default)]
    pub run_at: Option<String>,
    /// Reason stored on auto-closed game nights.
    #[serde(default)]
    pub auto_completed_reason: Option<String>,
    /// HTTP listen port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::macros::time;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let config = AppConfig::from_sources(RawConfig::default(), env_from(&[])).unwrap();
        assert_eq!(config.timezone_name(), "America/New_York");
        assert_eq!(config.run_at(), time!(00:01));
        assert_eq!(config.auto_completed_reason(), DEFAULT_AUTO_COMPLETED_REASON);
        assert_eq!(config.port(), 8080);
        assert_eq!(
            config.store(),
            &StoreSettings::Mongo {
                uri: "mongodb://localhost:27017".into(),
                database: "league".into(),
            }
        );
    }

    #[test]
    fn file_values_and_env_overrides_are_applied() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"timezone": "Europe/Berlin", "runAt": "02:30", "autoCompletedReason": "closed", "port": 9000}"#,
        )
        .unwrap();
        let config = AppConfig::from_sources(
            raw,
            env_from(&[("STORE_BACKEND", "memory"), ("PORT", "9100")]),
        )
        .unwrap();

        assert_eq!(config.timezone_name(), "Europe/Berlin");
        assert_eq!(config.run_at(), time!(02:30));
        assert_eq!(config.auto_completed_reason(), "closed");
        assert_eq!(config.port(), 9100);
        assert_eq!(config.store(), &StoreSettings::Memory);
    }

    #[test]
    fn rejects_invalid_values() {
        let raw = RawConfig {
            timezone: Some("Mars/Olympus_Mons".into()),
            ..RawConfig::default()
        };
        assert!(matches!(
            AppConfig::from_sources(raw, env_from(&[])),
            Err(ConfigError::UnknownTimezone(_))
        ));

        let raw = RawConfig {
            run_at: Some("midnight".into()),
            ..RawConfig::default()
        };
        assert!(matches!(
            AppConfig::from_sources(raw, env_from(&[])),
            Err(ConfigError::InvalidRunAt { .. })
        ));

        assert!(matches!(
            AppConfig::from_sources(RawConfig::default(), env_from(&[("STORE_BACKEND", "couch")])),
            Err(ConfigError::UnknownBackend(_))
        ));
        assert!(matches!(
            AppConfig::from_sources(RawConfig::default(), env_from(&[("PORT", "http")])),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(serde_json::from_str::<RawConfig>(r#"{"colors": []}"#).is_err());
    }
}
