// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One OAuth credential per user, on top of a [`CredentialRepo`].

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::db::CredentialRepo;
use crate::error::AppError;
use crate::models::Credential;
use crate::time_utils::format_utc_rfc3339;

/// `now + expires_in_seconds`, or `None` when the sum is not representable.
pub fn expiry_after(now: DateTime<Utc>, expires_in_seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in_seconds).and_then(|lifetime| now.checked_add_signed(lifetime))
}

/// Credential store service.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn CredentialRepo>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn CredentialRepo>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        self.repo.get_credential(user_id).await
    }

    /// Create or overwrite the user's credential with a freshly issued token.
    ///
    /// `expires_at` is computed from `expires_in_seconds` relative to now and
    /// the credential is (re)activated.
    pub async fn upsert(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_type: &str,
        expires_in_seconds: i64,
        scopes: Vec<String>,
    ) -> Result<Credential, AppError> {
        let now = Utc::now();
        let expires_at = expiry_after(now, expires_in_seconds).ok_or_else(|| {
            AppError::WhoopApi(format!("Token lifetime out of range: {}s", expires_in_seconds))
        })?;
        let credential = Credential {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            token_type: token_type.to_string(),
            expires_at: format_utc_rfc3339(expires_at),
            scopes,
            active: true,
            updated_at: format_utc_rfc3339(now),
        };

        self.repo.put_credential(&credential).await?;
        tracing::debug!(user_id, expires_at = %credential.expires_at, "Credential stored");

        Ok(credential)
    }

    /// Mark the credential inactive. Returns whether a credential existed.
    pub async fn deactivate(&self, user_id: &str) -> Result<bool, AppError> {
        let Some(mut credential) = self.repo.get_credential(user_id).await? else {
            return Ok(false);
        };

        credential.active = false;
        credential.updated_at = format_utc_rfc3339(Utc::now());
        self.repo.put_credential(&credential).await?;

        tracing::info!(user_id, "Credential deactivated");
        Ok(true)
    }

    /// Whether the user has an active credential usable for at least the
    /// validity buffer.
    pub async fn is_valid(&self, user_id: &str) -> Result<bool, AppError> {
        Ok(self
            .repo
            .get_credential(user_id)
            .await?
            .is_some_and(|c| c.is_valid_at(Utc::now())))
    }

    /// Active credentials expiring within `buffer_hours`.
    pub async fn list_due_for_refresh(&self, buffer_hours: i64) -> Result<Vec<Credential>, AppError> {
        let now = Utc::now();
        Ok(self
            .repo
            .list_credentials()
            .await?
            .into_iter()
            .filter(|c| c.is_due_for_refresh(now, buffer_hours))
            .collect())
    }

    pub async fn list_active(&self) -> Result<Vec<Credential>, AppError> {
        Ok(self
            .repo
            .list_credentials()
            .await?
            .into_iter()
            .filter(|c| c.active)
            .collect())
    }

    /// Every stored credential, including inactive ones.
    pub async fn list_all(&self) -> Result<Vec<Credential>, AppError> {
        self.repo.list_credentials().await
    }
}
