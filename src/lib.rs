// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! whoop-sync: keep WHOOP health metrics in local storage
//!
//! This crate keeps each authorized user's WHOOP OAuth credential valid and
//! periodically pulls cycles, sleeps, workouts and recoveries into storage,
//! merging them idempotently.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::{CredentialRepo, RecordRepo};
use error::AppError;
use services::{
    CredentialStore, MergeEngine, OAuthStateStore, PaginatedFetcher, SyncScheduler,
    TokenRefresher, WhoopClient,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub whoop: WhoopClient,
    pub credentials: CredentialStore,
    pub records: Arc<dyn RecordRepo>,
    pub refresher: TokenRefresher,
    pub scheduler: SyncScheduler,
    pub oauth_states: OAuthStateStore,
}

impl AppState {
    /// Wire all services on top of the given repositories.
    pub fn build(
        config: Config,
        credential_repo: Arc<dyn CredentialRepo>,
        record_repo: Arc<dyn RecordRepo>,
    ) -> Result<Self, AppError> {
        let whoop = WhoopClient::new(&config)?;
        let credentials = CredentialStore::new(credential_repo);
        let refresher = TokenRefresher::new(whoop.clone(), credentials.clone());
        let fetcher = PaginatedFetcher::new(whoop.clone(), refresher.clone(), config.fetch_policy());
        let merge = MergeEngine::new(record_repo.clone());
        let scheduler = SyncScheduler::new(
            credentials.clone(),
            refresher.clone(),
            fetcher,
            merge,
            record_repo.clone(),
            config.scheduler_settings(),
        );

        Ok(Self {
            config,
            whoop,
            credentials,
            records: record_repo,
            refresher,
            scheduler,
            oauth_states: OAuthStateStore::new(),
        })
    }
}
