// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Paginated fetcher tests: cursors, rate limits, auth retries, backoff.

mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use whoop_sync::error::AppError;
use whoop_sync::models::{AccessToken, Category, RecordData};
use whoop_sync::services::{FetchWindow, PaginatedFetcher};
use whoop_sync::AppState;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(state: &Arc<AppState>) -> PaginatedFetcher {
    PaginatedFetcher::new(
        state.whoop.clone(),
        state.refresher.clone(),
        state.config.fetch_policy(),
    )
}

fn window() -> FetchWindow {
    FetchWindow {
        start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
    }
}

fn token(access: &str) -> AccessToken {
    AccessToken {
        access_token: access.to_string(),
        token_type: "bearer".to_string(),
    }
}

#[tokio::test]
async fn test_follows_cursor_until_exhausted() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(query_param("start", "2024-01-01T00:00:00Z"))
        .and(query_param("end", "2024-01-08T00:00:00Z"))
        .and(query_param_is_missing("nextToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [common::cycle_record(1001, "2024-01-02T00:00:00.000Z")],
            "next_token": "abc"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(query_param("nextToken", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [common::cycle_record(1002, "2024-01-03T00:00:00.000Z")],
            "next_token": ""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = fetcher(&state)
        .fetch("u1", Category::Cycle, window(), token("access-1"))
        .await
        .unwrap();

    assert_eq!(batch.pages, 2);
    assert_eq!(batch.skipped, 0);
    let keys: Vec<&str> = batch.records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["1001", "1002"]);
    assert!(matches!(batch.records[0].data, RecordData::Cycle(ref c) if c.score_state == "SCORED"));
    assert_eq!(batch.records[0].user_id, "u1");
}

#[tokio::test]
async fn test_malformed_record_is_skipped() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                common::cycle_record(1001, "2024-01-02T00:00:00.000Z"),
                { "id": 1002, "start": "2024-01-02T06:00:00.000Z", "score_state": "SCORED" },
                common::cycle_record(1003, "not a timestamp")
            ]
        })))
        .mount(&server)
        .await;

    let batch = fetcher(&state)
        .fetch("u1", Category::Cycle, window(), token("access-1"))
        .await
        .unwrap();

    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].key, "1001");
    assert_eq!(batch.skipped, 2);
}

#[tokio::test]
async fn test_rate_limit_waits_and_retries_same_page() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/activity/sleep"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/activity/sleep"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = fetcher(&state)
        .fetch("u1", Category::Sleep, window(), token("access-1"))
        .await
        .unwrap();
    assert!(batch.records.is_empty());
    assert_eq!(batch.pages, 1);
}

#[tokio::test]
async fn test_rate_limit_budget_is_bounded() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .respond_with(ResponseTemplate::new(429))
        .expect(11)
        .mount(&server)
        .await;

    let err = fetcher(&state)
        .fetch("u1", Category::Cycle, window(), token("access-1"))
        .await
        .unwrap_err();

    match err {
        AppError::FetchExhausted { attempts, category, .. } => {
            assert_eq!(attempts, 11);
            assert_eq!(category, "cycle");
        }
        other => panic!("expected FetchExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_and_retries() {
    let server = MockServer::start().await;
    let (state, db) = common::test_state(&server);
    common::seed_credential(&db, "u1", "access-1", "refresh-1", Duration::hours(1));

    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [common::cycle_record(1001, "2024-01-02T00:00:00.000Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_response("access-2", "refresh-2")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let batch = fetcher(&state)
        .fetch("u1", Category::Cycle, window(), token("access-1"))
        .await
        .unwrap();
    assert_eq!(batch.records.len(), 1);
}

#[tokio::test]
async fn test_second_unauthorized_is_auth_rejected() {
    let server = MockServer::start().await;
    let (state, db) = common::test_state(&server);
    common::seed_credential(&db, "u1", "access-1", "refresh-1", Duration::hours(1));

    Mock::given(method("GET"))
        .and(path("/v1/activity/workout"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_response("access-2", "refresh-2")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(&state)
        .fetch("u1", Category::Workout, window(), token("access-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuthRejected(ref u) if u == "u1"));
    assert!(err.is_terminal());

    let stored = state.credentials.get("u1").await.unwrap().unwrap();
    assert!(!stored.active);
    assert_eq!(stored.access_token, "access-2");
    assert!(state.credentials.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/recovery"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let err = fetcher(&state)
        .fetch("u1", Category::Recovery, window(), token("access-1"))
        .await
        .unwrap_err();

    match err {
        AppError::FetchExhausted {
            ref user_id,
            attempts,
            ref last_error,
            ..
        } => {
            assert_eq!(user_id, "u1");
            assert_eq!(attempts, 4);
            assert!(last_error.contains("500"));
        }
        ref other => panic!("expected FetchExhausted, got {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_transient_error_then_success() {
    let server = MockServer::start().await;
    let (state, _db) = common::test_state(&server);

    Mock::given(method("GET"))
        .and(path("/v1/recovery"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/recovery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{
                "cycle_id": 93845,
                "sleep_id": "ecfc6a15-4661-442f-a9a4-f160dd7afae8",
                "user_id": 10129,
                "created_at": "2024-01-02T11:25:44.774Z",
                "updated_at": "2024-01-02T14:25:44.774Z",
                "score_state": "SCORED",
                "score": { "recovery_score": 44.0, "resting_heart_rate": 64.0 }
            }]
        })))
        .mount(&server)
        .await;

    let batch = fetcher(&state)
        .fetch("u1", Category::Recovery, window(), token("access-1"))
        .await
        .unwrap();
    assert_eq!(batch.records.len(), 1);
    assert_eq!(
        batch.records[0].key,
        "93845_ecfc6a15-4661-442f-a9a4-f160dd7afae8"
    );
}
