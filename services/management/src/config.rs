//! Management service configuration loading.
//!
//! The environment is the sole config source.
//!
//! # Required variables
//! - `ENCRYPTION_KEY` — base64, exactly 32 decoded bytes
//!
//! # Optional variables (defaults)
//! - `API_PORT` (3000)
//! - `DATABASE_PATH` (`vibelink.sqlite3`)
//! - `CORS_ORIGIN` — comma-separated allow-list, enforced in production
//! - `APP_ENV` — development | test | production (development)
//! - `LOG_LEVEL` tracing filter (falls back to RUST_LOG, then "info")

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Test,
    Production,
}

#[derive(Debug, Clone)]
pub struct ManagementConfig {
    /// Base64 key material; decoded and length-checked by the codec at boot.
    pub encryption_key: String,
    pub api_port: u16,
    pub database_path: String,
    pub cors_origins: Vec<String>,
    pub env: AppEnv,
    pub log_level: Option<String>,
}

impl ManagementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let encryption_key = get("ENCRYPTION_KEY")
            .ok_or_else(|| ConfigError::MissingField("ENCRYPTION_KEY".to_owned()))?;

        let api_port = match get("API_PORT") {
            None => 3000,
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                ConfigError::InvalidValue(format!("API_PORT must be a port number, got '{}'", raw))
            })?,
        };

        let database_path = get("DATABASE_PATH").unwrap_or_else(|| "vibelink.sqlite3".to_owned());

        let cors_origins: Vec<String> = get("CORS_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let env = match get("APP_ENV").as_deref() {
            None | Some("development") => AppEnv::Development,
            Some("test") => AppEnv::Test,
            Some("production") => AppEnv::Production,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "APP_ENV must be development, test, or production, got '{}'",
                    other
                )))
            }
        };
        if env == AppEnv::Production && cors_origins.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CORS_ORIGIN is required in production".to_owned(),
            ));
        }

        Ok(ManagementConfig {
            encryption_key,
            api_port,
            database_path,
            cors_origins,
            env,
            log_level: get("LOG_LEVEL"),
        })
    }
}

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
