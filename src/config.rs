//! Process configuration
//!
//! Loaded once from the environment (and `.env`, if present) and passed
//! explicitly to whatever needs it.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: String,
    pub log_level: String,
    pub port: u16,

    // Fund data source
    pub mfapi_base_url: String,
    pub mfapi_timeout: Duration,
    pub search_limit: usize,

    // Gateway cache
    pub enable_cache: bool,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,

    // Reasoning service
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub default_temperature: f32,

    // Pipeline
    pub request_timeout: Duration,
    pub max_question_chars: usize,
    pub retry_base_delay: Duration,
    pub strict_synthesis: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_env: "development".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            mfapi_base_url: "https://api.mfapi.in/mf".to_string(),
            mfapi_timeout: Duration::from_secs(30),
            search_limit: 5,
            enable_cache: true,
            cache_ttl: Duration::from_secs(3600),
            cache_max_size: 1000,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            default_temperature: 0.1,
            request_timeout: Duration::from_millis(30_000),
            max_question_chars: 500,
            retry_base_delay: Duration::from_millis(200),
            strict_synthesis: false,
        }
    }
}

impl Settings {
    /// Reads `.env` then the process environment
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("PORT")
            .or_else(|| get("API_PORT"))
            .map(|raw| parse_value("PORT", &raw, defaults.port))
            .unwrap_or(defaults.port);

        Self {
            app_env: get("APP_ENV").unwrap_or(defaults.app_env),
            log_level: get("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            port,
            mfapi_base_url: get("MFAPI_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.mfapi_base_url),
            mfapi_timeout: Duration::from_secs(read(&get, "MFAPI_TIMEOUT_SECS", 30)),
            search_limit: read(&get, "SEARCH_LIMIT", defaults.search_limit).max(1),
            enable_cache: read(&get, "ENABLE_CACHE", defaults.enable_cache),
            cache_ttl: Duration::from_secs(read(&get, "CACHE_TTL_SECS", 3600)),
            cache_max_size: read(&get, "CACHE_MAX_SIZE", defaults.cache_max_size).max(1),
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            default_temperature: read(&get, "DEFAULT_TEMPERATURE", defaults.default_temperature),
            request_timeout: Duration::from_millis(read(&get, "REQUEST_TIMEOUT_MS", 30_000)),
            max_question_chars: read(&get, "MAX_QUESTION_CHARS", defaults.max_question_chars)
                .max(1),
            retry_base_delay: Duration::from_millis(read(&get, "RETRY_BASE_DELAY_MS", 200)),
            strict_synthesis: read(&get, "STRICT_SYNTHESIS", defaults.strict_synthesis),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_base_delay(self.retry_base_delay)
    }

    pub fn has_reasoning_key(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

fn read<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| parse_value(key, &raw, default))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().to_lowercase().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = raw, "Invalid configuration value, using default");
            default
        }
    }
}
