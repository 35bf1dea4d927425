// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token lifecycle: single-flight refresh, forced refresh after a
//! rejected token, proactive batch refresh, code exchange and revocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::REQUIRED_SCOPES;
use crate::error::AppError;
use crate::models::{AccessToken, Credential};
use crate::services::credentials::{expiry_after, CredentialStore};
use crate::services::whoop::{WhoopClient, WhoopError};

/// Per-user refresh state. The mutex serializes every credential mutation
/// for the user; it guards the failure reason of the last remote exchange.
#[derive(Default)]
pub struct RefreshFlight {
    /// Remote exchanges finished so far
    completed: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

pub type RefreshLocks = Arc<DashMap<String, Arc<RefreshFlight>>>;

/// Outcome of [`TokenRefresher::refresh_due_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRefreshSummary {
    pub refreshed: usize,
    pub revoked: usize,
    pub failed: usize,
}

/// Keeps each user's access token usable.
///
/// Concurrent callers for the same user share one remote exchange: the
/// first takes the per-user lock and refreshes, the rest wait on the lock
/// and reuse its outcome. On success they find the new credential in the
/// store; on a transient failure they get the same error without calling
/// the token endpoint again.
#[derive(Clone)]
pub struct TokenRefresher {
    client: WhoopClient,
    store: CredentialStore,
    refresh_locks: RefreshLocks,
}

impl TokenRefresher {
    pub fn new(client: WhoopClient, store: CredentialStore) -> Self {
        Self {
            client,
            store,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn flight_for(&self, user_id: &str) -> Arc<RefreshFlight> {
        self.refresh_locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Stored credential, failing for missing or inactive ones.
    async fn load_active(&self, user_id: &str) -> Result<Credential, AppError> {
        match self.store.get(user_id).await? {
            None => Err(AppError::CredentialMissing(user_id.to_string())),
            Some(c) if !c.active => Err(AppError::CredentialRevoked(user_id.to_string())),
            Some(c) => Ok(c),
        }
    }

    /// Return a usable access token, refreshing it first if needed.
    pub async fn ensure_valid(&self, user_id: &str) -> Result<AccessToken, AppError> {
        let credential = self.load_active(user_id).await?;
        if credential.is_valid_at(Utc::now()) {
            return Ok(credential.access_token());
        }

        let (credential, _) = self
            .refresh_single_flight(user_id, |c| c.is_valid_at(Utc::now()))
            .await?;
        Ok(credential.access_token())
    }

    /// Refresh the user's token now, regardless of its expiry.
    pub async fn refresh(&self, user_id: &str) -> Result<Credential, AppError> {
        let (credential, _) = self.refresh_single_flight(user_id, |_| false).await?;
        Ok(credential)
    }

    /// Replace an access token the API just rejected.
    ///
    /// If the stored token already differs from `rejected_access_token`,
    /// someone else refreshed it and it is returned without a remote call.
    pub async fn force_refresh(
        &self,
        user_id: &str,
        rejected_access_token: &str,
    ) -> Result<AccessToken, AppError> {
        let (credential, _) = self
            .refresh_single_flight(user_id, |c| c.access_token != rejected_access_token)
            .await?;
        Ok(credential.access_token())
    }

    /// The API rejected a freshly refreshed token. Deactivate the credential
    /// unless it was rotated again meanwhile. Returns whether it was
    /// deactivated.
    pub async fn reject(
        &self,
        user_id: &str,
        rejected_access_token: &str,
    ) -> Result<bool, AppError> {
        let flight = self.flight_for(user_id);
        let _guard = flight.last_failure.lock().await;

        match self.store.get(user_id).await? {
            Some(c) if c.active && c.access_token == rejected_access_token => {
                self.store.deactivate(user_id).await?;
                tracing::warn!(user_id, "Access token rejected after refresh, credential deactivated");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Exchange the refresh token unless `satisfied` already holds for the
    /// stored credential. Returns the credential and whether this call did
    /// the remote exchange.
    ///
    /// A caller that waited on the lock while another exchange finished
    /// reuses that exchange's failure instead of trying again.
    async fn refresh_single_flight(
        &self,
        user_id: &str,
        satisfied: impl Fn(&Credential) -> bool,
    ) -> Result<(Credential, bool), AppError> {
        let flight = self.flight_for(user_id);
        let seen = flight.completed.load(Ordering::Acquire);
        let mut last_failure = flight.last_failure.lock().await;

        if flight.completed.load(Ordering::Acquire) != seen {
            if let Some(reason) = last_failure.clone() {
                tracing::debug!(user_id, "Reusing failed refresh from concurrent caller");
                return Err(AppError::RefreshTransient {
                    user_id: user_id.to_string(),
                    reason,
                });
            }
        }

        let credential = self.load_active(user_id).await?;
        if satisfied(&credential) {
            tracing::debug!(user_id, "Token already refreshed by another task");
            return Ok((credential, false));
        }

        tracing::info!(user_id, "Refreshing access token");
        let result = self.exchange_refresh_token(credential, &mut last_failure).await;
        flight.completed.fetch_add(1, Ordering::Release);
        result.map(|credential| (credential, true))
    }

    /// Refresh every active credential expiring within `buffer_hours`.
    ///
    /// Users are handled independently; one failure never stops the batch.
    pub async fn refresh_due_batch(
        &self,
        buffer_hours: i64,
    ) -> Result<BatchRefreshSummary, AppError> {
        let due = self.store.list_due_for_refresh(buffer_hours).await?;
        let mut summary = BatchRefreshSummary::default();

        for credential in due {
            let user_id = credential.user_id.as_str();
            let seen_access_token = credential.access_token.as_str();
            match self
                .refresh_single_flight(user_id, |c| c.access_token != seen_access_token)
                .await
            {
                Ok(_) => summary.refreshed += 1,
                Err(AppError::CredentialRevoked(_)) => summary.revoked += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Proactive refresh failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            refreshed = summary.refreshed,
            revoked = summary.revoked,
            failed = summary.failed,
            "Proactive token refresh complete"
        );

        Ok(summary)
    }

    /// Exchange the stored refresh token. Caller holds the user's lock and
    /// passes its guard so the outcome is recorded for waiters.
    async fn exchange_refresh_token(
        &self,
        credential: Credential,
        last_failure: &mut MutexGuard<'_, Option<String>>,
    ) -> Result<Credential, AppError> {
        let user_id = credential.user_id.as_str();
        **last_failure = None;

        let response = match self.client.refresh_token(&credential.refresh_token).await {
            Ok(response) => response,
            Err(WhoopError::InvalidGrant) => return self.handle_invalid_grant(credential).await,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Token refresh failed");
                return Err(Self::transient(user_id, e.to_string(), last_failure));
            }
        };

        if expiry_after(Utc::now(), response.expires_in).is_none() {
            tracing::warn!(
                user_id,
                expires_in = response.expires_in,
                "Token response has unusable lifetime"
            );
            return Err(Self::transient(
                user_id,
                format!("malformed token response: expires_in {} out of range", response.expires_in),
                last_failure,
            ));
        }

        let scopes = response.scopes().unwrap_or_else(|| credential.scopes.clone());
        let refresh_token = response
            .refresh_token
            .as_deref()
            .unwrap_or(&credential.refresh_token);
        let token_type = response
            .token_type
            .as_deref()
            .unwrap_or(&credential.token_type);

        let updated = match self
            .store
            .upsert(
                user_id,
                &response.access_token,
                refresh_token,
                token_type,
                response.expires_in,
                scopes,
            )
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Refreshed token could not be stored");
                **last_failure = Some(e.to_string());
                return Err(e);
            }
        };

        tracing::info!(user_id, expires_at = %updated.expires_at, "Token refreshed");
        Ok(updated)
    }

    fn transient(
        user_id: &str,
        reason: String,
        last_failure: &mut MutexGuard<'_, Option<String>>,
    ) -> AppError {
        **last_failure = Some(reason.clone());
        AppError::RefreshTransient {
            user_id: user_id.to_string(),
            reason,
        }
    }

    /// The refresh token was rejected. Another process may have rotated it
    /// already; only deactivate if the store still holds the rejected one.
    async fn handle_invalid_grant(&self, credential: Credential) -> Result<Credential, AppError> {
        let user_id = credential.user_id.as_str();

        if let Some(stored) = self.store.get(user_id).await? {
            if stored.active && stored.refresh_token != credential.refresh_token {
                tracing::info!(
                    user_id,
                    "Refresh token race detected - another process won, using stored credential"
                );
                return Ok(stored);
            }
        }

        self.store.deactivate(user_id).await?;
        tracing::warn!(user_id, "Refresh token rejected, credential deactivated");
        Err(AppError::CredentialRevoked(user_id.to_string()))
    }

    /// Complete the authorization-code flow and store the new credential.
    pub async fn authorize_with_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credential, AppError> {
        let response = self
            .client
            .exchange_code(code, redirect_uri)
            .await
            .map_err(|e| match e {
                WhoopError::InvalidGrant => {
                    AppError::BadRequest("Authorization code rejected".to_string())
                }
                other => AppError::from(other),
            })?;

        let refresh_token = response.refresh_token.clone().ok_or_else(|| {
            AppError::WhoopApi("Token response has no refresh token (offline scope missing?)".to_string())
        })?;
        let token_type = response
            .token_type
            .clone()
            .unwrap_or_else(|| "bearer".to_string());

        let access = AccessToken {
            access_token: response.access_token.clone(),
            token_type: token_type.clone(),
        };
        let profile = self.client.get_profile(&access).await?;
        let user_id = profile.user_id.as_str();

        let scopes = response
            .scopes()
            .unwrap_or_else(|| REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect());

        let flight = self.flight_for(user_id);
        let _guard = flight.last_failure.lock().await;

        let credential = self
            .store
            .upsert(
                user_id,
                &response.access_token,
                &refresh_token,
                &token_type,
                response.expires_in,
                scopes,
            )
            .await?;

        tracing::info!(user_id, "User authorized");
        Ok(credential)
    }

    /// Revoke the user's tokens remotely and deactivate the credential.
    ///
    /// Remote revocation failures are logged; the credential is deactivated
    /// regardless. Returns whether a credential existed.
    pub async fn revoke(&self, user_id: &str) -> Result<bool, AppError> {
        let flight = self.flight_for(user_id);
        let _guard = flight.last_failure.lock().await;

        let Some(credential) = self.store.get(user_id).await? else {
            return Ok(false);
        };

        if credential.active {
            for (kind, token) in [
                ("access", &credential.access_token),
                ("refresh", &credential.refresh_token),
            ] {
                if let Err(e) = self.client.revoke_token(token).await {
                    tracing::warn!(user_id, kind, error = %e, "Remote token revocation failed");
                }
            }
        }

        self.store.deactivate(user_id).await
    }
}
