//! Agent configuration loading.
//!
//! The environment is the sole config source; CLI flags may override
//! individual values on top.
//!
//! # Required variables
//! - `GATEWAY_URL` (ws:// or wss://)
//! - `GATEWAY_EMAIL`
//! - `GATEWAY_PASSWORD`
//!
//! # Optional variables (defaults)
//! - `CONNECT_TIMEOUT` seconds (10)
//! - `COMMAND_TIMEOUT` seconds (30)
//! - `ACQUISITION_TIMEOUT` seconds (60)
//! - `HEARTBEAT_INTERVAL` seconds (30)
//! - `SENSOR_SERIAL` preferred sensor
//! - `LOG_LEVEL` tracing filter (falls back to RUST_LOG, then "info")

use std::time::Duration;

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gateway_url: String,
    pub email: String,
    /// Held only for the lifetime of the session attempts; never logged.
    pub password: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub acquisition_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub preferred_serial: Option<i64>,
    pub log_level: Option<String>,
}

/// Flag-level overrides applied on top of the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub serial: Option<i64>,
    pub log_level: Option<String>,
}

impl AgentConfig {
    /// Load from the process environment.
    pub fn from_env(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    /// Load from an arbitrary lookup (tests inject maps here).
    pub fn from_lookup<F>(get: F, overrides: &ConfigOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway_url = match &overrides.url {
            Some(url) => url.clone(),
            None => get("GATEWAY_URL")
                .ok_or_else(|| ConfigError::MissingField("GATEWAY_URL".to_owned()))?,
        };
        if !gateway_url.starts_with("ws://") && !gateway_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(format!(
                "GATEWAY_URL must be a ws:// or wss:// URL, got '{}'",
                gateway_url
            )));
        }

        let email = get("GATEWAY_EMAIL")
            .ok_or_else(|| ConfigError::MissingField("GATEWAY_EMAIL".to_owned()))?;
        let password = get("GATEWAY_PASSWORD")
            .ok_or_else(|| ConfigError::MissingField("GATEWAY_PASSWORD".to_owned()))?;

        let connect_timeout = seconds(&get, "CONNECT_TIMEOUT", 10)?;
        let command_timeout = seconds(&get, "COMMAND_TIMEOUT", 30)?;
        let acquisition_timeout = seconds(&get, "ACQUISITION_TIMEOUT", 60)?;
        let heartbeat_interval = seconds(&get, "HEARTBEAT_INTERVAL", 30)?;

        let preferred_serial = match overrides.serial {
            Some(serial) => Some(serial),
            None => match get("SENSOR_SERIAL") {
                Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "SENSOR_SERIAL must be an integer, got '{}'",
                        raw
                    ))
                })?),
                None => None,
            },
        };

        let log_level = overrides.log_level.clone().or_else(|| get("LOG_LEVEL"));

        Ok(AgentConfig {
            gateway_url,
            email,
            password,
            connect_timeout,
            command_timeout,
            acquisition_timeout,
            heartbeat_interval,
            preferred_serial,
            log_level,
        })
    }
}

fn seconds<F>(get: &F, key: &str, default_secs: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(Duration::from_secs(default_secs)),
        Some(raw) => {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(format!("{} must be a whole number of seconds, got '{}'", key, raw))
            })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at least 1 second",
                    key
                )));
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingField(s) => write!(f, "Missing required variable: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
