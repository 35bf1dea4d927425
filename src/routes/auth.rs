// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP OAuth authorization routes.
//!
//! `/auth/whoop` sends the browser to WHOOP; the callback exchanges the code,
//! stores the credential and answers with JSON.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::REQUIRED_SCOPES;
use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/whoop", get(auth_start))
        .route("/auth/whoop/callback", get(auth_callback))
}

/// Start OAuth flow - redirect to WHOOP authorization.
async fn auth_start(State(state): State<Arc<AppState>>) -> Result<Redirect> {
    let purged = state.oauth_states.purge_expired();
    if purged > 0 {
        tracing::debug!(purged, "Dropped expired OAuth states");
    }

    let oauth_state = state.oauth_states.issue()?;
    let auth_url =
        state
            .whoop
            .authorize_url(&state.config.redirect_uri, REQUIRED_SCOPES, &oauth_state);

    tracing::info!(
        redirect_uri = %state.config.redirect_uri,
        "Starting OAuth flow, redirecting to WHOOP"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub user_id: String,
    pub expires_at: String,
    pub scopes: Vec<String>,
}

/// OAuth callback - validate state, exchange code, store credential.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "User declined authorization");
        return Err(AppError::BadRequest(format!("Authorization failed: {}", error)));
    }

    let oauth_state = params
        .state
        .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;
    if !state.oauth_states.take(&oauth_state) {
        tracing::warn!("OAuth callback with unknown or expired state");
        return Err(AppError::BadRequest("Invalid or expired state".to_string()));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing code parameter".to_string()))?;

    let credential = state
        .refresher
        .authorize_with_code(&code, &state.config.redirect_uri)
        .await?;

    Ok(Json(CallbackResponse {
        user_id: credential.user_id,
        expires_at: credential.expires_at,
        scopes: credential.scopes,
    }))
}
