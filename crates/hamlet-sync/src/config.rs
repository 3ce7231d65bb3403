//! Configuration loading and typed config structures for the sync engine.
//!
//! The engine reads an optional YAML file (see `hamlet-sync.yaml` in the
//! client's working directory). Every field has a default, so an empty
//! document is a valid configuration. Timer periods and the offline
//! threshold are tuning values, not protocol constants.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override did not parse.
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidOverride {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// Why it did not parse.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Recurring timer periods.
    #[serde(default)]
    pub timers: TimerConfig,

    /// Offline catch-up settings.
    #[serde(default)]
    pub offline: OfflineConfig,

    /// Credential renewal settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Event bus settings.
    #[serde(default)]
    pub bus: BusConfig,
}

impl SyncConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `HAMLET_RESOURCE_POLL_SECS` overrides `timers.resource_poll_secs`
    /// - `HAMLET_OFFLINE_MIN_MINUTES` overrides `offline.min_elapsed_minutes`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] if an override is not a number.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply environment overrides in place.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if a set variable does not
    /// parse as an unsigned integer.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(secs) = env_u64("HAMLET_RESOURCE_POLL_SECS")? {
            self.timers.resource_poll_secs = secs;
        }
        if let Some(minutes) = env_u64("HAMLET_OFFLINE_MIN_MINUTES")? {
            self.offline.min_elapsed_minutes = minutes;
        }
        Ok(())
    }
}

/// Read an optional numeric environment variable.
fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidOverride {
                name,
                reason: e.to_string(),
                value: value.clone(),
            }),
        Err(_) => Ok(None),
    }
}

/// Recurring timer periods.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimerConfig {
    /// Authoritative ledger re-pull period.
    #[serde(default = "default_resource_poll_secs")]
    pub resource_poll_secs: u64,

    /// Population re-pull period.
    #[serde(default = "default_population_poll_secs")]
    pub population_poll_secs: u64,

    /// Countdown tick period in milliseconds.
    #[serde(default = "default_training_tick_ms")]
    pub training_tick_ms: u64,

    /// Training queue re-fetch period.
    #[serde(default = "default_training_refetch_secs")]
    pub training_refetch_secs: u64,

    /// Credential freshness check period.
    #[serde(default = "default_watchdog_check_secs")]
    pub watchdog_check_secs: u64,
}

impl TimerConfig {
    /// Ledger poll period.
    pub const fn resource_poll(&self) -> Duration {
        Duration::from_secs(self.resource_poll_secs)
    }

    /// Population poll period.
    pub const fn population_poll(&self) -> Duration {
        Duration::from_secs(self.population_poll_secs)
    }

    /// Countdown tick period.
    pub const fn training_tick(&self) -> Duration {
        Duration::from_millis(self.training_tick_ms)
    }

    /// Queue re-fetch period.
    pub const fn training_refetch(&self) -> Duration {
        Duration::from_secs(self.training_refetch_secs)
    }

    /// Watchdog check period.
    pub const fn watchdog_check(&self) -> Duration {
        Duration::from_secs(self.watchdog_check_secs)
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            resource_poll_secs: default_resource_poll_secs(),
            population_poll_secs: default_population_poll_secs(),
            training_tick_ms: default_training_tick_ms(),
            training_refetch_secs: default_training_refetch_secs(),
            watchdog_check_secs: default_watchdog_check_secs(),
        }
    }
}

/// Offline catch-up settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OfflineConfig {
    /// Absences shorter than this many whole minutes are treated as noise.
    #[serde(default = "default_min_elapsed_minutes")]
    pub min_elapsed_minutes: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            min_elapsed_minutes: default_min_elapsed_minutes(),
        }
    }
}

/// Credential renewal settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Renew when the credential expires within this many seconds.
    #[serde(default = "default_expiry_margin_secs")]
    pub expiry_margin_secs: u64,

    /// First retry delay after a failed renewal.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Ceiling on the retry delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Attempts per renewal before giving up until the next check.
    #[serde(default = "default_max_renewal_attempts")]
    pub max_renewal_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_margin_secs: default_expiry_margin_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_renewal_attempts: default_max_renewal_attempts(),
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// Delays after a donation-received notice at which a re-pull is
    /// announced again.
    #[serde(default = "default_donation_echo_delays_ms")]
    pub donation_echo_delays_ms: Vec<u64>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            donation_echo_delays_ms: default_donation_echo_delays_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_resource_poll_secs() -> u64 {
    30
}

const fn default_population_poll_secs() -> u64 {
    10
}

const fn default_training_tick_ms() -> u64 {
    1000
}

const fn default_training_refetch_secs() -> u64 {
    5
}

const fn default_watchdog_check_secs() -> u64 {
    300
}

const fn default_min_elapsed_minutes() -> u64 {
    2
}

const fn default_expiry_margin_secs() -> u64 {
    600
}

const fn default_backoff_base_ms() -> u64 {
    2000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_max_renewal_attempts() -> u32 {
    5
}

fn default_donation_echo_delays_ms() -> Vec<u64> {
    vec![1500, 5000]
}
