//! Environment-driven configuration.
//!
//! `main` calls `dotenvy::dotenv()` first, so every variable can also come
//! from a `.env` file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::capability::DEFAULT_API_HOST;
use crate::client::ServerErrorPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment or .env file")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_host: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// Consecutive 5xx poll responses tolerated before failing a job.
    pub retry_server_errors: u32,
    pub bind_addr: String,
    pub profiles_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset and empty values fall back to
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("STABILITY_KEY").ok_or(ConfigError::Missing("STABILITY_KEY"))?;

        Ok(Self {
            api_key,
            api_host: get("API_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            poll_interval: Duration::from_secs(parse_or(&get, "POLL_INTERVAL_SECS", 10)?),
            poll_timeout: Duration::from_secs(parse_or(&get, "WORKER_TIMEOUT", 500)?),
            retry_server_errors: parse_or(&get, "RETRY_SERVER_ERRORS", 0)?,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            profiles_file: get("PROFILES_FILE").map(PathBuf::from),
        })
    }

    pub fn server_error_policy(&self) -> ServerErrorPolicy {
        ServerErrorPolicy::from_retries(self.retry_server_errors)
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
