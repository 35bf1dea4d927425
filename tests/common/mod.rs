// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use whoop_sync::config::Config;
use whoop_sync::db::{CredentialRepo, FirestoreDb, MemoryDb, RecordRepo};
use whoop_sync::models::{Category, Credential};
use whoop_sync::routes::create_router;
use whoop_sync::time_utils::format_utc_rfc3339;
use whoop_sync::AppState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Test config pointing both WHOOP base URLs at a mock server.
#[allow(dead_code)]
pub fn whoop_config(server_uri: &str) -> Config {
    Config {
        api_base_url: server_uri.to_string(),
        oauth_base_url: format!("{}/oauth/oauth2", server_uri),
        ..Config::test_default()
    }
}

/// Application state over an in-memory store, talking to `server`.
#[allow(dead_code)]
pub fn test_state(server: &MockServer) -> (Arc<AppState>, Arc<MemoryDb>) {
    test_state_with_config(whoop_config(&server.uri()))
}

#[allow(dead_code)]
pub fn test_state_with_config(config: Config) -> (Arc<AppState>, Arc<MemoryDb>) {
    let db = Arc::new(MemoryDb::new());
    let state = AppState::build(
        config,
        db.clone() as Arc<dyn CredentialRepo>,
        db.clone() as Arc<dyn RecordRepo>,
    )
    .expect("Failed to build app state");
    (Arc::new(state), db)
}

/// Create a test app over an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app(config: Config) -> (axum::Router, Arc<AppState>, Arc<MemoryDb>) {
    let (state, db) = test_state_with_config(config);
    (create_router(state.clone()), state, db)
}

/// Credential expiring `expires_in` from now.
#[allow(dead_code)]
pub fn credential(user_id: &str, access: &str, refresh: &str, expires_in: Duration) -> Credential {
    let now = Utc::now();
    Credential {
        user_id: user_id.to_string(),
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        token_type: "bearer".to_string(),
        expires_at: format_utc_rfc3339(now + expires_in),
        scopes: vec!["offline".to_string(), "read:cycles".to_string()],
        active: true,
        updated_at: format_utc_rfc3339(now),
    }
}

#[allow(dead_code)]
pub fn seed_credential(
    db: &MemoryDb,
    user_id: &str,
    access: &str,
    refresh: &str,
    expires_in: Duration,
) -> Credential {
    let credential = credential(user_id, access, refresh, expires_in);
    db.insert_credential(credential.clone());
    credential
}

/// Successful token endpoint body.
#[allow(dead_code)]
pub fn token_response(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "scope": "offline read:cycles read:sleep read:workout read:recovery"
    })
}

/// A complete cycle record as the API returns it.
#[allow(dead_code)]
pub fn cycle_record(id: i64, updated_at: &str) -> Value {
    json!({
        "id": id,
        "user_id": 10129,
        "created_at": "2024-01-01T12:00:00.000Z",
        "updated_at": updated_at,
        "start": "2024-01-01T06:00:00.000Z",
        "end": "2024-01-02T06:00:00.000Z",
        "timezone_offset": "-05:00",
        "score_state": "SCORED",
        "score": {
            "strain": 5.29,
            "kilojoule": 8288.3,
            "average_heart_rate": 68,
            "max_heart_rate": 141
        }
    })
}

/// Serve an empty page for every category except `except`.
#[allow(dead_code)]
pub async fn mount_empty_pages(server: &MockServer, except: &[Category]) {
    for category in Category::ALL {
        if except.contains(&category) {
            continue;
        }
        Mock::given(method("GET"))
            .and(path(category.path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
            .mount(server)
            .await;
    }
}
