use anyhow::{bail, Result};
use std::collections::HashMap;

/// Environment-driven configuration for the backend HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            user_agent: format!("toolscan/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl BackendSettings {
    pub const BASE_URL_ENV: &'static str = "TOOLSCAN_BASE_URL";
    pub const TIMEOUT_ENV: &'static str = "TOOLSCAN_TIMEOUT_SECS";
    pub const USER_AGENT_ENV: &'static str = "TOOLSCAN_USER_AGENT";

    const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:8080";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Load settings from environment variables.
    ///
    /// * `TOOLSCAN_BASE_URL`: Backend origin (default: `http://127.0.0.1:8080`).
    /// * `TOOLSCAN_TIMEOUT_SECS`: Per-request timeout (default: 30).
    /// * `TOOLSCAN_USER_AGENT`: Optional user agent override.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let base_url = vars
            .get(Self::BASE_URL_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.base_url);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!(
                "environment variable {} must be an http(s) URL (got `{}`)",
                Self::BASE_URL_ENV,
                base_url
            );
        }
        let timeout_secs = vars
            .get(Self::TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.timeout_secs);
        let user_agent = vars
            .get(Self::USER_AGENT_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.user_agent);

        Ok(Self {
            base_url,
            timeout_secs,
            user_agent,
        })
    }
}
