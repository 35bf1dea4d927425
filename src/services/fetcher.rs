// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cursor-paginated retrieval of one category for one user.
//!
//! Each page is retried independently:
//! - 429: wait for `Retry-After` (or the configured default), retry the same
//!   page; bounded by `max_rate_limit_waits`, not by `max_retries`
//! - 401: force a token refresh once per page, then give up with `AuthRejected`
//! - anything else: exponential backoff up to `max_retries`

use chrono::{DateTime, Utc};

use crate::config::FetchPolicy;
use crate::error::AppError;
use crate::models::{AccessToken, Category, HealthRecord};
use crate::services::refresher::TokenRefresher;
use crate::services::whoop::{Page, WhoopClient, WhoopError};

/// Half-open time range `[start, end)` to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Decoded records of one category.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub records: Vec<HealthRecord>,
    /// Records dropped because they could not be decoded
    pub skipped: usize,
    pub pages: usize,
}

/// Paginated fetcher with retry handling.
#[derive(Clone)]
pub struct PaginatedFetcher {
    client: WhoopClient,
    refresher: TokenRefresher,
    policy: FetchPolicy,
}

impl PaginatedFetcher {
    pub fn new(client: WhoopClient, refresher: TokenRefresher, policy: FetchPolicy) -> Self {
        Self {
            client,
            refresher,
            policy,
        }
    }

    /// Fetch every record of `category` in `window`, following cursors until
    /// the API stops returning one.
    pub async fn fetch(
        &self,
        user_id: &str,
        category: Category,
        window: FetchWindow,
        token: AccessToken,
    ) -> Result<FetchedBatch, AppError> {
        let mut token = token;
        let mut batch = FetchedBatch::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .fetch_page(user_id, category, window, &mut token, cursor.as_deref())
                .await?;
            batch.pages += 1;

            for raw in &page.records {
                match HealthRecord::decode(user_id, category, raw) {
                    Ok(record) => batch.records.push(record),
                    Err(e) => {
                        tracing::warn!(
                            user_id,
                            category = %category,
                            error = %e,
                            "Skipping malformed record"
                        );
                        batch.skipped += 1;
                    }
                }
            }

            match page.cursor() {
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        tracing::debug!(
            user_id,
            category = %category,
            records = batch.records.len(),
            skipped = batch.skipped,
            pages = batch.pages,
            "Fetch complete"
        );

        Ok(batch)
    }

    async fn fetch_page(
        &self,
        user_id: &str,
        category: Category,
        window: FetchWindow,
        token: &mut AccessToken,
        cursor: Option<&str>,
    ) -> Result<Page, AppError> {
        let mut attempt: u32 = 0;
        let mut rate_limit_waits: u32 = 0;
        let mut refreshed = false;

        loop {
            let result = self
                .client
                .get_page(token, category, window.start, window.end, cursor)
                .await;

            let error = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            match error {
                WhoopError::RateLimited { retry_after } => {
                    if rate_limit_waits >= self.policy.max_rate_limit_waits {
                        return Err(self.exhausted(
                            user_id,
                            category,
                            attempt + rate_limit_waits + 1,
                            &error,
                        ));
                    }
                    rate_limit_waits += 1;

                    let wait = retry_after.unwrap_or(self.policy.rate_limit_default);
                    tracing::info!(
                        user_id,
                        category = %category,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting before retrying page"
                    );
                    tokio::time::sleep(wait).await;
                }
                WhoopError::Unauthorized => {
                    if refreshed {
                        tracing::warn!(
                            user_id,
                            category = %category,
                            "Access token rejected again after refresh"
                        );
                        if let Err(e) = self.refresher.reject(user_id, &token.access_token).await {
                            tracing::error!(user_id, error = %e, "Failed to deactivate rejected credential");
                        }
                        return Err(AppError::AuthRejected(user_id.to_string()));
                    }
                    refreshed = true;

                    tracing::info!(user_id, category = %category, "Access token rejected, forcing refresh");
                    *token = self
                        .refresher
                        .force_refresh(user_id, &token.access_token)
                        .await?;
                }
                _ => {
                    if attempt >= self.policy.max_retries {
                        return Err(self.exhausted(user_id, category, attempt + 1, &error));
                    }

                    let delay = self.policy.backoff_delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        user_id,
                        category = %category,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Page request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn exhausted(
        &self,
        user_id: &str,
        category: Category,
        attempts: u32,
        last_error: &WhoopError,
    ) -> AppError {
        tracing::error!(
            user_id,
            category = %category,
            attempts,
            error = %last_error,
            "Giving up on page"
        );
        AppError::FetchExhausted {
            user_id: user_id.to_string(),
            category: category.to_string(),
            attempts,
            last_error: last_error.to_string(),
        }
    }
}
