// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup. Components never read the environment
//! themselves; they receive the derived [`FetchPolicy`] and
//! [`SchedulerSettings`] values.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Category;

pub const DEFAULT_API_BASE_URL: &str = "https://api.prod.whoop.com/developer";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://api.prod.whoop.com/oauth/oauth2";

/// Scopes requested during authorization. `offline` is what grants a refresh token.
pub const REQUIRED_SCOPES: &[&str] = &[
    "read:cycles",
    "read:recovery",
    "read:sleep",
    "read:workout",
    "read:profile",
    "offline",
];

/// Which repository implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StorageBackend::Firestore),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- WHOOP OAuth application ---
    pub whoop_client_id: String,
    pub whoop_client_secret: String,
    /// Callback registered with WHOOP for the authorization-code flow
    pub redirect_uri: String,
    pub api_base_url: String,
    pub oauth_base_url: String,

    // --- Storage ---
    pub storage_backend: StorageBackend,
    /// GCP project ID (Firestore backend only)
    pub gcp_project_id: String,

    // --- HTTP surface ---
    pub host: String,
    pub port: u16,
    /// Bearer token for the admin status API. `None` disables the API.
    pub admin_api_token: Option<String>,

    // --- Sync engine ---
    pub sync_interval: Duration,
    pub refresh_buffer_hours: i64,
    pub lookback_days: i64,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub rate_limit_default: Duration,
    pub request_timeout: Duration,
    pub max_concurrent_users: usize,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            whoop_client_id: "test_client_id".to_string(),
            whoop_client_secret: "test_secret".to_string(),
            redirect_uri: "http://localhost:8080/auth/whoop/callback".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            storage_backend: StorageBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            admin_api_token: Some("test_admin_token".to_string()),
            sync_interval: Duration::from_secs(60 * 60),
            refresh_buffer_hours: 24,
            lookback_days: 30,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(10),
            rate_limit_default: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            max_concurrent_users: 4,
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let port: u16 = parse_var("PORT", 8080)?;

        Ok(Self {
            whoop_client_id: required("WHOOP_CLIENT_ID")?,
            whoop_client_secret: required("WHOOP_CLIENT_SECRET")?,
            redirect_uri: env::var("WHOOP_REDIRECT_URI")
                .unwrap_or_else(|_| format!("http://localhost:{}/auth/whoop/callback", port)),
            api_base_url: env::var("WHOOP_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            oauth_base_url: env::var("WHOOP_OAUTH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OAUTH_BASE_URL.to_string()),

            storage_backend: parse_var("STORAGE_BACKEND", StorageBackend::Firestore)?,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),

            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            admin_api_token: env::var("ADMIN_API_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            sync_interval: Duration::from_secs(60 * parse_var::<u64>("SYNC_INTERVAL_MINUTES", 60)?),
            refresh_buffer_hours: parse_var("REFRESH_BUFFER_HOURS", 24)?,
            lookback_days: parse_var("SYNC_LOOKBACK_DAYS", 30)?,
            max_retries: parse_var("MAX_RETRIES", 3)?,
            retry_base_delay: Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 2000)?),
            rate_limit_default: Duration::from_secs(parse_var("RATE_LIMIT_DEFAULT_SECS", 60)?),
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 30)?),
            max_concurrent_users: parse_var::<usize>("MAX_CONCURRENT_USERS", 4)?.max(1),
        })
    }

    /// Retry policy handed to the paginated fetcher.
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            rate_limit_default: self.rate_limit_default,
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
        }
    }

    /// Cycle settings handed to the scheduler.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            sync_interval: self.sync_interval,
            refresh_buffer_hours: self.refresh_buffer_hours,
            lookback: chrono::Duration::days(self.lookback_days),
            max_concurrent_users: self.max_concurrent_users,
            categories: Category::ALL.to_vec(),
        }
    }
}

/// Separate budget for 429 responses, which do not consume `max_retries`.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 10;

/// Retry/backoff behavior of the paginated fetcher.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Used when a 429 carries no usable `Retry-After` header
    pub rate_limit_default: Duration,
    pub max_rate_limit_waits: u32,
}

impl FetchPolicy {
    /// Delay before retry number `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Scheduler cycle settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub sync_interval: Duration,
    pub refresh_buffer_hours: i64,
    /// Fetch window start when no watermark exists yet
    pub lookback: chrono::Duration,
    pub max_concurrent_users: usize,
    pub categories: Vec<Category>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
