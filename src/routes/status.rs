// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin status API.
//! The admin middleware is applied in routes/mod.rs for these routes.

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{Category, CredentialSummary};
use crate::services::{SchedulerStatus, UserSyncReport};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", get(list_users))
        .route(
            "/api/users/{user_id}/sync",
            get(get_sync_status).post(trigger_sync),
        )
        .route("/api/users/{user_id}/credential", delete(revoke_credential))
        .route("/api/scheduler", get(get_scheduler))
}

/// List users with their credential metadata (no tokens).
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<CredentialSummary>>> {
    let users = state
        .credentials
        .list_all()
        .await?
        .iter()
        .map(|c| c.summary())
        .collect();
    Ok(Json(users))
}

#[derive(Debug, Serialize)]
pub struct CategoryStatus {
    pub category: Category,
    pub watermark: Option<String>,
    pub record_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub user_id: String,
    pub active: bool,
    pub expires_at: String,
    pub categories: Vec<CategoryStatus>,
}

/// Per-category watermark and record count for one user.
async fn get_sync_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SyncStatusResponse>> {
    let credential = state
        .credentials
        .get(&user_id)
        .await?
        .ok_or_else(|| AppError::CredentialMissing(user_id.clone()))?;

    let mut categories = Vec::with_capacity(Category::ALL.len());
    for category in Category::ALL {
        let watermark = state
            .records
            .get_watermark(&user_id, category)
            .await?
            .map(|w| w.updated_at);
        let record_count = state.records.count_records(&user_id, category).await?;
        categories.push(CategoryStatus {
            category,
            watermark,
            record_count,
        });
    }

    Ok(Json(SyncStatusResponse {
        user_id,
        active: credential.active,
        expires_at: credential.expires_at,
        categories,
    }))
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub user_id: String,
    pub revoked: bool,
}

/// Revoke the user's tokens and deactivate the credential.
async fn revoke_credential(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<RevokeResponse>> {
    if !state.refresher.revoke(&user_id).await? {
        return Err(AppError::CredentialMissing(user_id));
    }

    tracing::info!(user_id = %user_id, "Credential revoked by operator");
    Ok(Json(RevokeResponse {
        user_id,
        revoked: true,
    }))
}

/// Sync one user now, outside the regular schedule.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserSyncReport>> {
    if state.credentials.get(&user_id).await?.is_none() {
        return Err(AppError::CredentialMissing(user_id));
    }

    tracing::info!(user_id = %user_id, "Manual sync requested");
    Ok(Json(state.scheduler.sync_user(&user_id).await))
}

async fn get_scheduler(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}
