//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WIKIFETCH_*)
//! 2. TOML config file (if WIKIFETCH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, MAX_REQUEST_CEILING};

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WIKIFETCH_*)
/// 2. TOML config file (if WIKIFETCH_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root URL of the wiki, e.g. `https://en.wikipedia.org/`.
    #[serde(default = "default_wiki_url")]
    pub wiki_url: String,

    /// Path of the action API relative to `wiki_url`.
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Speed multiplier for the outbound concurrency ceiling.
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Concurrent requests allowed per unit of `speed`.
    #[serde(default = "default_requests_per_speed")]
    pub requests_per_speed: usize,

    /// Retries after the first attempt before an error is surfaced.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Random spread added to each retry delay, as a fraction of the delay.
    #[serde(default = "default_retry_randomisation")]
    pub retry_randomisation: f64,

    /// Directory for the local disk cache. Disabled when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Path to the SQLite state database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Keep optimized images in the state database's media table.
    #[serde(default)]
    pub optimisation_cache: bool,

    /// Request category membership with article metadata.
    #[serde(default)]
    pub get_categories: bool,

    /// Switch to local rendering services when a remote endpoint is unusable.
    #[serde(default = "default_true")]
    pub local_fallback: bool,

    /// Probe the legacy rendering endpoint at startup.
    #[serde(default = "default_true")]
    pub probe_legacy: bool,

    #[serde(default)]
    pub local_mobile_url: Option<String>,

    #[serde(default)]
    pub local_legacy_url: Option<String>,

    /// Concurrent consumers for full-table scans.
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,

    /// Keys requested per scan call.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_wiki_url() -> String {
    "https://en.wikipedia.org/".into()
}

fn default_api_path() -> String {
    "w/api.php".into()
}

fn default_user_agent() -> String {
    "wikifetch/0.1".into()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_speed() -> f64 {
    1.0
}

fn default_requests_per_speed() -> usize {
    10
}

fn default_max_retries() -> u32 {
    7
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_retry_randomisation() -> f64 {
    0.2
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./wikifetch-state.sqlite")
}

fn default_scan_workers() -> usize {
    4
}

fn default_scan_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            wiki_url: default_wiki_url(),
            api_path: default_api_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            speed: default_speed(),
            requests_per_speed: default_requests_per_speed(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retry_randomisation: default_retry_randomisation(),
            cache_dir: None,
            db_path: default_db_path(),
            optimisation_cache: false,
            get_categories: false,
            local_fallback: true,
            probe_legacy: true,
            local_mobile_url: None,
            local_legacy_url: None,
            scan_workers: default_scan_workers(),
            scan_batch_size: default_scan_batch_size(),
            username: None,
            password: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Initial outbound concurrency ceiling: `speed * requests_per_speed`, at least 1.
    pub fn request_ceiling(&self) -> usize {
        ((self.speed * self.requests_per_speed as f64).ceil() as usize).max(1)
    }

    /// Login credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WIKIFETCH_`
    /// 2. TOML file from `WIKIFETCH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WIKIFETCH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WIKIFETCH_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
