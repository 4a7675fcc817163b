use crate::error::{DashboardError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "tngtech/deepseek-r1t-chimera:free";
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_RETRIES: usize = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_UPLOAD_MB: usize = 50;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime settings, read once at startup
#[derive(Clone, Debug)]
pub struct Config {
    /// Credential for the completion endpoint. Suggestions fail without it.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    /// Address the web server binds to
    pub addr: String,
    /// Total attempts per suggestion when the endpoint rate-limits
    pub suggest_retries: usize,
    pub suggest_retry_delay: Duration,
    pub suggest_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            addr: DEFAULT_ADDR.to_string(),
            suggest_retries: DEFAULT_RETRIES,
            suggest_retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            suggest_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset or blank keys use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();
        Config {
            api_key: get("OPENROUTER_API_KEY"),
            api_url: get("OPENROUTER_API_URL").unwrap_or(defaults.api_url),
            model: get("OPENROUTER_MODEL").unwrap_or(defaults.model),
            addr: get("DASHBOARD_ADDR").unwrap_or(defaults.addr),
            suggest_retries: parse_or("SUGGEST_RETRIES", get("SUGGEST_RETRIES"), DEFAULT_RETRIES)
                .max(1),
            suggest_retry_delay: Duration::from_secs(parse_or(
                "SUGGEST_RETRY_DELAY_SECS",
                get("SUGGEST_RETRY_DELAY_SECS"),
                DEFAULT_RETRY_DELAY_SECS,
            )),
            suggest_timeout: Duration::from_secs(parse_or(
                "SUGGEST_TIMEOUT_SECS",
                get("SUGGEST_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )),
            max_upload_bytes: parse_or(
                "DASHBOARD_MAX_UPLOAD_MB",
                get("DASHBOARD_MAX_UPLOAD_MB"),
                DEFAULT_MAX_UPLOAD_MB,
            ) * 1024
                * 1024,
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            DashboardError::Config(
                "OPENROUTER_API_KEY is not set; add it to the environment or a .env file".into(),
            )
        })
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("{}='{}' is not valid, using {}", key, raw, default);
            default
        }),
    }
}
