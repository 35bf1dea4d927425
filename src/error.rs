// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the sync engine and the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("No credential stored for user {0}")]
    CredentialMissing(String),

    #[error("Credential for user {0} was revoked and needs re-authorization")]
    CredentialRevoked(String),

    #[error("Token refresh failed for user {user_id}: {reason}")]
    RefreshTransient { user_id: String, reason: String },

    #[error("Fetching {category} for user {user_id} failed after {attempts} attempts: {last_error}")]
    FetchExhausted {
        user_id: String,
        category: String,
        attempts: u32,
        last_error: String,
    },

    #[error("WHOOP rejected the access token for user {0} after a forced refresh")]
    AuthRejected(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("WHOOP API error: {0}")]
    WhoopApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Errors that exclude the user from future cycles until re-authorization.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppError::CredentialMissing(_) | AppError::CredentialRevoked(_) | AppError::AuthRejected(_)
        )
    }

    /// Errors that a later cycle may succeed on without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RefreshTransient { .. }
                | AppError::FetchExhausted { .. }
                | AppError::WhoopApi(_)
                | AppError::Database(_)
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::CredentialMissing(user_id) => (
                StatusCode::NOT_FOUND,
                "credential_missing",
                Some(user_id.clone()),
            ),
            AppError::CredentialRevoked(user_id) => (
                StatusCode::CONFLICT,
                "credential_revoked",
                Some(user_id.clone()),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::RefreshTransient { .. }
            | AppError::FetchExhausted { .. }
            | AppError::AuthRejected(_)
            | AppError::WhoopApi(_) => (
                StatusCode::BAD_GATEWAY,
                "whoop_error",
                Some(self.to_string()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type Result<T> = std::result::Result<T, AppError>;
