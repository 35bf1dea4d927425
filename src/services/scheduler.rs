// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recurring sync cycles over all active users.
//!
//! A cycle first refreshes credentials that expire soon, then syncs every
//! active user with bounded concurrency. For one user all categories run
//! concurrently; a failing category never affects the others, and a failing
//! user never affects other users. Watermarks only advance after the
//! category's fetch and merge both succeeded. At most one sync runs per
//! user at a time, whether started by a cycle or by hand.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures_util::{future, stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::SchedulerSettings;
use crate::db::RecordRepo;
use crate::error::AppError;
use crate::models::{AccessToken, Category, SyncWatermark};
use crate::services::credentials::CredentialStore;
use crate::services::fetcher::{FetchWindow, PaginatedFetcher};
use crate::services::merge::MergeEngine;
use crate::services::refresher::{BatchRefreshSummary, TokenRefresher};
use crate::time_utils::format_utc_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    ShuttingDown,
}

/// Published on the scheduler's watch channel.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_cycle: Option<CycleSummary>,
}

/// Result of syncing one category for one user.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub fetched: usize,
    pub skipped: usize,
    pub merged: usize,
    pub unchanged: usize,
    /// Watermark after this run, if any
    pub watermark: Option<String>,
    pub error: Option<String>,
    /// The error requires re-authorization
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
}

impl CategoryReport {
    fn failed(category: Category, error: &AppError) -> Self {
        Self {
            category,
            fetched: 0,
            skipped: 0,
            merged: 0,
            unchanged: 0,
            watermark: None,
            error: Some(error.to_string()),
            terminal: error.is_terminal(),
        }
    }
}

/// Result of [`SyncScheduler::sync_user`].
#[derive(Debug, Clone, Serialize)]
pub struct UserSyncReport {
    pub user_id: String,
    pub categories: Vec<CategoryReport>,
    /// Set when the user could not be synced at all (no usable token)
    pub error: Option<String>,
    /// The credential needs re-authorization
    pub terminal: bool,
    /// Another sync for this user was already running
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub busy: bool,
}

impl UserSyncReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.categories.iter().all(|c| c.error.is_none())
    }

    pub fn records_merged(&self) -> usize {
        self.categories.iter().map(|c| c.merged).sum()
    }

    fn not_synced(user_id: &str, error: String, terminal: bool, busy: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            categories: Vec::new(),
            error: Some(error),
            terminal,
            busy,
        }
    }
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub started_at: String,
    pub finished_at: String,
    pub refresh: BatchRefreshSummary,
    pub users_synced: usize,
    pub users_failed: usize,
    /// Users not started because shutdown was requested or a sync for
    /// them was already running
    pub users_skipped: usize,
    pub category_failures: usize,
    pub records_merged: usize,
    /// Set when the cycle could not enumerate users
    pub error: Option<String>,
}

/// Sync scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    credentials: CredentialStore,
    refresher: TokenRefresher,
    fetcher: PaginatedFetcher,
    merge: MergeEngine,
    records: Arc<dyn RecordRepo>,
    settings: SchedulerSettings,
    status_tx: Arc<watch::Sender<SchedulerStatus>>,
    in_progress: Arc<DashSet<String>>,
}

/// Marks a user as syncing until dropped.
struct SyncGuard {
    in_progress: Arc<DashSet<String>>,
    user_id: String,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.in_progress.remove(&self.user_id);
    }
}

impl SyncScheduler {
    pub fn new(
        credentials: CredentialStore,
        refresher: TokenRefresher,
        fetcher: PaginatedFetcher,
        merge: MergeEngine,
        records: Arc<dyn RecordRepo>,
        settings: SchedulerSettings,
    ) -> Self {
        let (status_tx, _) = watch::channel(SchedulerStatus {
            state: SchedulerState::Idle,
            last_cycle: None,
        });

        Self {
            credentials,
            refresher,
            fetcher,
            merge,
            records,
            settings,
            status_tx: Arc::new(status_tx),
            in_progress: Arc::new(DashSet::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_tx.borrow().clone()
    }

    fn set_state(&self, state: SchedulerState) {
        self.status_tx.send_modify(|status| status.state = state);
    }

    /// Run cycles until `shutdown` turns true (or its sender goes away).
    ///
    /// The inter-cycle sleep is cut short by shutdown. A cycle in progress
    /// stops starting new users but lets started ones finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.settings.sync_interval.as_secs(),
            max_concurrent_users = self.settings.max_concurrent_users,
            "Starting sync scheduler"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(SchedulerState::Running);
            let summary = self.run_cycle_until(&shutdown).await;
            self.status_tx.send_modify(|status| {
                status.state = SchedulerState::Idle;
                status.last_cycle = Some(summary);
            });

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.sync_interval) => {}
            }
        }

        self.set_state(SchedulerState::ShuttingDown);
        tracing::info!("Sync scheduler stopped");
    }

    /// Run a single cycle to completion.
    pub async fn run_cycle(&self) -> CycleSummary {
        let (_never, shutdown) = watch::channel(false);
        self.run_cycle_until(&shutdown).await
    }

    async fn run_cycle_until(&self, shutdown: &watch::Receiver<bool>) -> CycleSummary {
        let mut summary = CycleSummary {
            started_at: format_utc_rfc3339(Utc::now()),
            ..Default::default()
        };
        tracing::info!("Sync cycle starting");

        match self
            .refresher
            .refresh_due_batch(self.settings.refresh_buffer_hours)
            .await
        {
            Ok(refresh) => summary.refresh = refresh,
            Err(e) => tracing::error!(error = %e, "Proactive refresh batch failed"),
        }

        let users: Vec<String> = match self.credentials.list_active().await {
            Ok(credentials) => credentials.into_iter().map(|c| c.user_id).collect(),
            Err(e) => {
                tracing::error!(error = %e, "Could not list active credentials");
                summary.error = Some(e.to_string());
                summary.finished_at = format_utc_rfc3339(Utc::now());
                return summary;
            }
        };

        let reports: Vec<Option<UserSyncReport>> = stream::iter(users)
            .map(|user_id| {
                let shutdown = shutdown.clone();
                async move {
                    if *shutdown.borrow() {
                        tracing::info!(user_id = %user_id, "Shutdown requested, not starting user sync");
                        return None;
                    }
                    Some(self.sync_user(&user_id).await)
                }
            })
            .buffer_unordered(self.settings.max_concurrent_users.max(1))
            .collect()
            .await;

        for report in reports {
            let Some(report) = report.filter(|r| !r.busy) else {
                summary.users_skipped += 1;
                continue;
            };
            if report.is_success() {
                summary.users_synced += 1;
            } else {
                summary.users_failed += 1;
            }
            summary.category_failures += report
                .categories
                .iter()
                .filter(|c| c.error.is_some())
                .count();
            summary.records_merged += report.records_merged();
        }

        summary.finished_at = format_utc_rfc3339(Utc::now());
        tracing::info!(
            users_synced = summary.users_synced,
            users_failed = summary.users_failed,
            users_skipped = summary.users_skipped,
            records_merged = summary.records_merged,
            "Sync cycle complete"
        );

        summary
    }

    fn try_start(&self, user_id: &str) -> Option<SyncGuard> {
        self.in_progress
            .insert(user_id.to_string())
            .then(|| SyncGuard {
                in_progress: self.in_progress.clone(),
                user_id: user_id.to_string(),
            })
    }

    /// Sync every configured category for one user.
    ///
    /// Returns a `busy` report without touching anything if a sync for the
    /// user is already running.
    pub async fn sync_user(&self, user_id: &str) -> UserSyncReport {
        let Some(_guard) = self.try_start(user_id) else {
            tracing::info!(user_id, "Sync already in progress, not starting another");
            return UserSyncReport::not_synced(
                user_id,
                "Sync already in progress".to_string(),
                false,
                true,
            );
        };

        let token = match self.refresher.ensure_valid(user_id).await {
            Ok(token) => token,
            Err(e) => {
                if e.is_terminal() {
                    tracing::warn!(user_id, error = %e, "Skipping user until re-authorized");
                } else {
                    tracing::error!(user_id, error = %e, "No usable token, skipping user this cycle");
                }
                return UserSyncReport::not_synced(user_id, e.to_string(), e.is_terminal(), false);
            }
        };

        let now = Utc::now();
        let categories = future::join_all(self.settings.categories.iter().map(|&category| {
            let token = token.clone();
            async move {
                match self.sync_category(user_id, category, token, now).await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(
                            user_id,
                            category = %category,
                            error = %e,
                            terminal = e.is_terminal(),
                            "Category sync failed"
                        );
                        CategoryReport::failed(category, &e)
                    }
                }
            }
        }))
        .await;

        let terminal = categories.iter().any(|c| c.terminal);

        UserSyncReport {
            user_id: user_id.to_string(),
            categories,
            error: None,
            terminal,
            busy: false,
        }
    }

    async fn sync_category(
        &self,
        user_id: &str,
        category: Category,
        token: AccessToken,
        now: DateTime<Utc>,
    ) -> Result<CategoryReport, AppError> {
        let watermark = self.records.get_watermark(user_id, category).await?;
        let start = watermark
            .as_ref()
            .and_then(SyncWatermark::updated_at_utc)
            .unwrap_or(now - self.settings.lookback);
        let window = FetchWindow { start, end: now };

        let batch = self.fetcher.fetch(user_id, category, window, token).await?;
        let outcome = self.merge.merge(category, &batch.records).await?;

        let mut current = watermark.map(|w| w.updated_at);
        if let Some(max_updated_at) = outcome.max_updated_at {
            let candidate = SyncWatermark::new(user_id, category, max_updated_at);
            if self.records.advance_watermark(&candidate).await? {
                current = Some(candidate.updated_at);
            }
        }

        tracing::info!(
            user_id,
            category = %category,
            fetched = batch.records.len(),
            skipped = batch.skipped,
            merged = outcome.merged,
            unchanged = outcome.unchanged,
            "Category synced"
        );

        Ok(CategoryReport {
            category,
            fetched: batch.records.len(),
            skipped: batch.skipped,
            merged: outcome.merged,
            unchanged: outcome.unchanged,
            watermark: current,
            error: None,
            terminal: false,
        })
    }
}
