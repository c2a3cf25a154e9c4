//! Runtime Configuration
//!
//! Layered as defaults → TOML file → `UNDERSEA_*` environment variables
//! (`__` separates nested keys, e.g. `UNDERSEA_POLLING__INTERVAL_MS=500`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use thing_runtime::{FireMode, RestartPolicy};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name the things are advertised under
    pub group_name: String,
    pub polling: PollingConfig,
    pub alerts: AlertConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group_name: "PD1AndPD2Device".to_string(),
            polling: PollingConfig::default(),
            alerts: AlertConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub restart: RestartConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            shutdown_timeout_ms: 5000,
            restart: RestartConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_restarts: Option<u32>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_restarts: None,
        }
    }
}

/// Threshold settings for device events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// PD1 emits GasLeakage while CO2 reads below this
    pub gas_leakage_below: f64,
    pub fire_mode: FireMode,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            gas_leakage_below: 20.0,
            fire_mode: FireMode::EveryTick,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "undersea=info,thing_runtime=info,thing_types=warn".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from defaults, the TOML file at `path` (if present) and the
    /// environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("UNDERSEA_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_name.trim().is_empty() {
            return Err(ConfigError::Invalid("group_name must not be empty".into()));
        }
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid("polling.interval_ms must be positive".into()));
        }
        if self.polling.restart.initial_backoff_ms > self.polling.restart.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "polling.restart.initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        if !self.alerts.gas_leakage_below.is_finite() {
            return Err(ConfigError::Invalid("alerts.gas_leakage_below must be finite".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.polling.shutdown_timeout_ms)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        let restart = &self.polling.restart;
        let policy = RestartPolicy::new(
            Duration::from_millis(restart.initial_backoff_ms),
            Duration::from_millis(restart.max_backoff_ms),
        );
        match restart.max_restarts {
            Some(max) => policy.with_max_restarts(max),
            None => policy,
        }
    }
}
