// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP developer API client.
//!
//! Handles:
//! - OAuth token exchange, refresh and revocation
//! - Basic profile lookup (to learn the user ID after authorization)
//! - Paged collection endpoints for each [`Category`]
//!
//! Failures are classified into [`WhoopError`] so callers can decide
//! between retrying, waiting, refreshing and giving up.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{AccessToken, Category};
use crate::time_utils::format_utc_rfc3339;

/// Client-level failure of a WHOOP request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WhoopError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("access token rejected (401)")]
    Unauthorized,

    #[error("refresh token rejected (invalid_grant)")]
    InvalidGrant,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for WhoopError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WhoopError::Timeout
        } else if e.is_decode() {
            WhoopError::Malformed(e.to_string())
        } else {
            WhoopError::Network(e.to_string())
        }
    }
}

impl From<WhoopError> for AppError {
    fn from(e: WhoopError) -> Self {
        AppError::WhoopApi(e.to_string())
    }
}

/// Token endpoint response (authorization code and refresh grants).
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Omitted by some refresh responses; the stored token stays valid then
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    /// Space-separated scope list
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// `GET /v1/user/profile/basic`. Only the id is needed to key the
/// credential; name and email are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoopProfile {
    #[serde(deserialize_with = "id_to_string")]
    pub user_id: String,
}

/// One page of a collection endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, alias = "nextToken")]
    pub next_token: Option<String>,
}

impl Page {
    /// Cursor for the following page. Empty strings end paging.
    pub fn cursor(&self) -> Option<&str> {
        self.next_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
}

fn id_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// WHOOP API client.
#[derive(Clone)]
pub struct WhoopClient {
    http: reqwest::Client,
    api_base_url: String,
    oauth_base_url: String,
    client_id: String,
    client_secret: String,
}

impl WhoopClient {
    /// Create a client. Every request uses `config.request_timeout`.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            oauth_base_url: config.oauth_base_url.trim_end_matches('/').to_string(),
            client_id: config.whoop_client_id.clone(),
            client_secret: config.whoop_client_secret.clone(),
        })
    }

    /// URL the user's browser is sent to for authorization.
    pub fn authorize_url(&self, redirect_uri: &str, scopes: &[&str], state: &str) -> String {
        format!(
            "{}/auth?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.oauth_base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            urlencoding::encode(state)
        )
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, WhoopError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "offline"),
        ])
        .await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, WhoopError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    /// Revoke an access or refresh token.
    pub async fn revoke_token(&self, token: &str) -> Result<(), WhoopError> {
        let response = self
            .http
            .post(format!("{}/revoke", self.oauth_base_url))
            .form(&[
                ("token", token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(classify_failure(response).await)
    }

    /// Basic profile of the token's owner.
    pub async fn get_profile(&self, token: &AccessToken) -> Result<WhoopProfile, WhoopError> {
        let response = self
            .http
            .get(format!("{}/v1/user/profile/basic", self.api_base_url))
            .header(reqwest::header::AUTHORIZATION, token.authorization_header())
            .send()
            .await?;

        check_response_json(response).await
    }

    /// Fetch one page of `category` records in `[start, end)`.
    pub async fn get_page(
        &self,
        token: &AccessToken,
        category: Category,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        next_token: Option<&str>,
    ) -> Result<Page, WhoopError> {
        let mut query = vec![
            ("start", format_utc_rfc3339(start)),
            ("end", format_utc_rfc3339(end)),
        ];
        if let Some(cursor) = next_token {
            query.push(("nextToken", cursor.to_string()));
        }

        let response = self
            .http
            .get(format!("{}{}", self.api_base_url, category.path()))
            .header(reqwest::header::AUTHORIZATION, token.authorization_header())
            .query(&query)
            .send()
            .await?;

        check_response_json(response).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, WhoopError> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_base_url))
            .form(form)
            .send()
            .await?;

        if response.status().is_success() {
            return response
                .json()
                .await
                .map_err(|e| WhoopError::Malformed(format!("token response: {}", e)));
        }

        let status = response.status();
        let retry_after = parse_retry_after(response.headers(), Utc::now());
        let body = response.text().await.unwrap_or_default();

        let oauth_error = serde_json::from_str::<OAuthErrorBody>(&body)
            .ok()
            .and_then(|b| b.error);
        if oauth_error.as_deref() == Some("invalid_grant") {
            return Err(WhoopError::InvalidGrant);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WhoopError::RateLimited { retry_after });
        }

        tracing::warn!(status = %status, body = %body, "WHOOP token endpoint failed");
        Err(WhoopError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, WhoopError> {
    if !response.status().is_success() {
        return Err(classify_failure(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| WhoopError::Malformed(e.to_string()))
}

async fn classify_failure(response: reqwest::Response) -> WhoopError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(response.headers(), Utc::now());
        tracing::warn!(?retry_after, "WHOOP rate limit hit (429)");
        return WhoopError::RateLimited { retry_after };
    }

    if status == StatusCode::UNAUTHORIZED {
        return WhoopError::Unauthorized;
    }

    let body = response.text().await.unwrap_or_default();
    WhoopError::Status {
        status: status.as_u16(),
        body,
    }
}

/// Parse a `Retry-After` header given either as delay-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((date - now).to_std().unwrap_or(Duration::ZERO))
}
