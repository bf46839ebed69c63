//! Configuration for the coordination components.
//!
//! Every component can be built from its own section:
//!
//! ```toml
//! [queue]
//! capacity = 32
//!
//! [coordinator]
//! resources = 5
//! policy = "global_order"
//! fairness_bound = 8
//! starvation_threshold = "2s"
//!
//! [coordinator.backoff]
//! initial = "1ms"
//! max = "50ms"
//! multiplier = 2.0
//!
//! [rate_limiter]
//! capacity = 100
//! window = "1s"
//! replenish = "steady"
//! ```
//!
//! [`ConfigLoader`] layers sources with increasing precedence:
//! 1. Built-in defaults
//! 2. TOML file
//! 3. `TURNSTILE_*` environment variables
//! 4. Programmatic overrides
//!
//! The merged result is validated before it is returned.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::PolicyKind;
use crate::error::{Error, ErrorKind};
use crate::rate_limit::ReplenishMode;

const ENV_PREFIX: &str = "TURNSTILE_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TurnstileConfig {
    /// Bounded queue settings.
    pub queue: QueueConfig,
    /// Resource-set coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Rate limiter settings.
    pub rate_limiter: RateLimiterConfig,
}

/// Bounded queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum number of buffered items.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

/// Resource-set coordinator settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Number of exclusive resources.
    pub resources: usize,
    /// Deadlock-avoidance policy.
    pub policy: PolicyKind,
    /// Overtakes tolerated before later arrivals are held back.
    pub fairness_bound: u32,
    /// Acquisition wait that triggers a long-wait diagnostic.
    #[serde(with = "humantime_serde")]
    pub starvation_threshold: Option<Duration>,
    /// Retry delays for [`PolicyKind::Backoff`].
    pub backoff: BackoffConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resources: 5,
            policy: PolicyKind::default(),
            fairness_bound: 8,
            starvation_threshold: None,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Randomized exponential backoff between acquisition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay ceiling after the first failed attempt.
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(50),
            multiplier: 2.0,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// Admissions allowed per window.
    pub capacity: usize,
    /// Sliding window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// How often the replenishment timer runs.
    pub replenish: ReplenishMode,
    /// Whether to run the replenishment timer thread. Without it, permits
    /// come back only through lazy or explicit replenishment.
    pub background_timer: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            window: Duration::from_secs(1),
            replenish: ReplenishMode::default(),
            background_timer: true,
        }
    }
}

impl TurnstileConfig {
    /// Parses a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML or unknown keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.coordinator.validate()?;
        self.rate_limiter.validate()
    }
}

impl QueueConfig {
    /// Validates the section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.capacity > 0, "queue.capacity", "greater than zero")
    }
}

impl CoordinatorConfig {
    /// Validates the section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.resources > 0, "coordinator.resources", "greater than zero")?;
        ensure(
            self.fairness_bound > 0,
            "coordinator.fairness_bound",
            "greater than zero",
        )?;
        ensure(
            self.starvation_threshold.is_none_or(|d| !d.is_zero()),
            "coordinator.starvation_threshold",
            "a non-zero duration",
        )?;
        self.backoff.validate()
    }
}

impl BackoffConfig {
    /// Validates the section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            !self.initial.is_zero(),
            "coordinator.backoff.initial",
            "a non-zero duration",
        )?;
        ensure(
            self.max >= self.initial,
            "coordinator.backoff.max",
            "at least coordinator.backoff.initial",
        )?;
        ensure(
            self.multiplier.is_finite() && self.multiplier >= 1.0,
            "coordinator.backoff.multiplier",
            "a finite number >= 1.0",
        )
    }
}

impl RateLimiterConfig {
    /// Validates the section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.capacity > 0, "rate_limiter.capacity", "greater than zero")?;
        ensure(
            !self.window.is_zero(),
            "rate_limiter.window",
            "a non-zero duration",
        )
    }
}

fn ensure(ok: bool, field: &'static str, requirement: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, requirement })
    }
}

/// Layered configuration loader.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file_path: Option<PathBuf>,
    read_env: bool,
    overrides: BTreeMap<String, String>,
}

impl ConfigLoader {
    /// Creates a loader that reads defaults and the environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file_path: None,
            read_env: true,
            overrides: BTreeMap::new(),
        }
    }

    /// Sets a TOML file to load on top of the defaults.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Skips `TURNSTILE_*` environment variables.
    #[must_use]
    pub fn ignore_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Adds a programmatic override (highest precedence). Keys use the
    /// environment spelling, e.g. `TURNSTILE_QUEUE_CAPACITY`.
    #[must_use]
    pub fn override_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Loads, merges and validates the configuration.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from reading, parsing, overriding or
    /// validation.
    pub fn load(&self) -> Result<TurnstileConfig, ConfigError> {
        let mut config = match &self.file_path {
            Some(path) => load_from_file(path)?,
            None => TurnstileConfig::default(),
        };

        if self.read_env {
            apply_env_overrides(&mut config)?;
        }
        apply_overrides(&mut config, &self.overrides)?;
        config.validate()?;
        tracing::debug!(
            file = ?self.file_path,
            overrides = self.overrides.len(),
            "configuration loaded"
        );
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading configuration.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed TOML or unknown keys.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("{field} must be {requirement}")]
    Invalid {
        /// Dotted path of the field.
        field: &'static str,
        /// What the value must satisfy.
        requirement: &'static str,
    },
    /// An override key is not recognized.
    #[error("unknown override key {0}")]
    UnknownKey(String),
    /// An override value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride {
        /// Override key.
        key: String,
        /// Rejected value.
        value: String,
    },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(err.to_string())
    }
}

fn load_from_file(path: &Path) -> Result<TurnstileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    TurnstileConfig::from_toml_str(&contents)
}

fn apply_env_overrides(config: &mut TurnstileConfig) -> Result<(), ConfigError> {
    let overrides: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    for (key, value) in &overrides {
        match apply_override(config, key, value) {
            // Other tools share the prefix (e.g. TURNSTILE_TEST_LOG).
            Err(ConfigError::UnknownKey(key)) => {
                tracing::trace!(%key, "ignoring unrecognized environment variable");
            }
            other => other?,
        }
    }
    Ok(())
}

fn apply_overrides(
    config: &mut TurnstileConfig,
    overrides: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in overrides {
        apply_override(config, key, value)?;
    }
    Ok(())
}

fn apply_override(config: &mut TurnstileConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "TURNSTILE_QUEUE_CAPACITY" => config.queue.capacity = parse(key, value)?,
        "TURNSTILE_COORDINATOR_RESOURCES" => config.coordinator.resources = parse(key, value)?,
        "TURNSTILE_COORDINATOR_POLICY" => config.coordinator.policy = parse(key, value)?,
        "TURNSTILE_COORDINATOR_FAIRNESS_BOUND" => {
            config.coordinator.fairness_bound = parse(key, value)?;
        }
        "TURNSTILE_COORDINATOR_STARVATION_THRESHOLD" => {
            config.coordinator.starvation_threshold = match value.trim() {
                "" | "none" | "off" => None,
                _ => Some(parse_duration(key, value)?),
            };
        }
        "TURNSTILE_COORDINATOR_BACKOFF_INITIAL" => {
            config.coordinator.backoff.initial = parse_duration(key, value)?;
        }
        "TURNSTILE_COORDINATOR_BACKOFF_MAX" => {
            config.coordinator.backoff.max = parse_duration(key, value)?;
        }
        "TURNSTILE_COORDINATOR_BACKOFF_MULTIPLIER" => {
            config.coordinator.backoff.multiplier = parse(key, value)?;
        }
        "TURNSTILE_RATE_LIMITER_CAPACITY" => config.rate_limiter.capacity = parse(key, value)?,
        "TURNSTILE_RATE_LIMITER_WINDOW" => {
            config.rate_limiter.window = parse_duration(key, value)?;
        }
        "TURNSTILE_RATE_LIMITER_REPLENISH" => config.rate_limiter.replenish = parse(key, value)?,
        "TURNSTILE_RATE_LIMITER_BACKGROUND_TIMER" => {
            config.rate_limiter.background_timer = parse(key, value)?;
        }
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid_override(key, value))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    }
}
