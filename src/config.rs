use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::http::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing GITHUB_TOKEN or GH_TOKEN")]
    MissingToken,
    #[error("Invalid value for {name}: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("Invalid API URL {0:?}")]
    InvalidUrl(String),
    #[error("Token contains characters not allowed in a header")]
    InvalidToken,
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Runtime configuration for the GitHub REST access layer.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub api_version: String,
    pub user_agent: String,
    /// Per-attempt timeout; a logical call may span several attempts.
    pub timeout_secs: u64,
    /// Attempts per logical call for transient failures, first one included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Upper bound on a single rate-limit suspension and on the total
    /// rate-limit waiting of one logical call.
    pub max_rate_limit_wait_secs: u64,
    pub per_page: u32,
    pub max_per_page: u32,
}

impl Config {
    /// Build a configuration with defaults for everything but the credential
    /// and base URL.
    pub fn new(token: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: api_url.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            user_agent: default_user_agent(),
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            max_rate_limit_wait_secs: 3600,
            per_page: 30,
            max_per_page: 100,
        }
    }

    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - GITHUB_TOKEN (or GH_TOKEN) [required]
    /// - GITHUB_API_URL (default: https://api.github.com)
    /// - GITHUB_API_VERSION (default: 2022-11-28)
    /// - GITHUB_USER_AGENT (default: gh-pager/<version>)
    /// - GITHUB_HTTP_TIMEOUT_SECS (default: 30)
    /// - GITHUB_MAX_ATTEMPTS (default: 3)
    /// - GITHUB_BACKOFF_BASE_MS (default: 500)
    /// - GITHUB_MAX_RATE_LIMIT_WAIT_SECS (default: 3600)
    /// - GITHUB_PER_PAGE (default: 30)
    /// - GITHUB_MAX_PER_PAGE (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = env::var("GITHUB_TOKEN")
            .or_else(|_| env::var("GH_TOKEN"))
            .map_err(|_| ConfigError::MissingToken)?;
        let api_url = env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let mut cfg = Self::new(token, api_url);
        if let Ok(v) = env::var("GITHUB_API_VERSION") {
            cfg.api_version = v;
        }
        if let Ok(v) = env::var("GITHUB_USER_AGENT") {
            cfg.user_agent = v;
        }
        cfg.timeout_secs = env_number("GITHUB_HTTP_TIMEOUT_SECS", cfg.timeout_secs)?;
        cfg.max_attempts = env_number("GITHUB_MAX_ATTEMPTS", cfg.max_attempts)?;
        cfg.backoff_base_ms = env_number("GITHUB_BACKOFF_BASE_MS", cfg.backoff_base_ms)?;
        cfg.max_rate_limit_wait_secs =
            env_number("GITHUB_MAX_RATE_LIMIT_WAIT_SECS", cfg.max_rate_limit_wait_secs)?;
        cfg.per_page = env_number("GITHUB_PER_PAGE", cfg.per_page)?;
        cfg.max_per_page = env_number("GITHUB_MAX_PER_PAGE", cfg.max_per_page)?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_millis(self.backoff_base_ms),
            max_rate_limit_wait: Duration::from_secs(self.max_rate_limit_wait_secs),
        }
    }

    /// Clamp a requested page size into `1..=max_per_page`.
    pub fn clamp_per_page(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.per_page)
            .clamp(1, self.max_per_page.max(1))
    }
}

fn default_user_agent() -> String {
    format!("gh-pager/{}", env!("CARGO_PKG_VERSION"))
}

fn env_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_is_clamped_to_server_maximum() {
        let cfg = Config::new("t", "http://localhost");
        assert_eq!(cfg.clamp_per_page(None), 30);
        assert_eq!(cfg.clamp_per_page(Some(500)), 100);
        assert_eq!(cfg.clamp_per_page(Some(0)), 1);
        assert_eq!(cfg.clamp_per_page(Some(42)), 42);
    }

    #[test]
    fn default_budget_is_three_attempts() {
        let cfg = Config::new("t", "http://localhost");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.retry_policy().max_attempts, 3);
    }

    #[test]
    fn retry_policy_follows_config() {
        let mut cfg = Config::new("t", "http://localhost");
        cfg.max_attempts = 7;
        cfg.backoff_base_ms = 10;
        cfg.max_rate_limit_wait_secs = 60;
        let p = cfg.retry_policy();
        assert_eq!(p.max_attempts, 7);
        assert_eq!(p.base, Duration::from_millis(10));
        assert_eq!(p.max_rate_limit_wait, Duration::from_secs(60));
    }
}
