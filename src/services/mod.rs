// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Business logic services.

pub mod credentials;
pub mod fetcher;
pub mod merge;
pub mod oauth_state;
pub mod refresher;
pub mod scheduler;
pub mod whoop;

pub use credentials::CredentialStore;
pub use fetcher::{FetchWindow, FetchedBatch, PaginatedFetcher};
pub use merge::{MergeEngine, MergeOutcome};
pub use oauth_state::OAuthStateStore;
pub use refresher::{BatchRefreshSummary, TokenRefresher};
pub use scheduler::{CycleSummary, SchedulerState, SchedulerStatus, SyncScheduler, UserSyncReport};
pub use whoop::{WhoopClient, WhoopError};
