// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! Services talk to storage through [`CredentialRepo`] and [`RecordRepo`].
//! [`FirestoreDb`] is the production backend; [`MemoryDb`] backs tests and
//! local development.

pub mod firestore;
pub mod memory;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{Category, Credential, HealthRecord, SyncWatermark};

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

/// Collection names as constants.
///
/// Health records live in one collection per category, see
/// [`Category::collection`].
pub mod collections {
    /// OAuth credentials (keyed by user_id)
    pub const CREDENTIALS: &str = "credentials";
    /// Sync watermarks (keyed by `{user_id}_{category}`)
    pub const SYNC_WATERMARKS: &str = "sync_watermarks";
}

/// Storage for per-user OAuth credentials.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError>;

    /// Create or overwrite the credential for `credential.user_id`.
    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError>;

    /// All stored credentials, active or not.
    async fn list_credentials(&self) -> Result<Vec<Credential>, AppError>;
}

/// Storage for health records and sync watermarks.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    async fn get_record(
        &self,
        category: Category,
        key: &str,
    ) -> Result<Option<HealthRecord>, AppError>;

    /// Write a batch of records as one logical operation.
    async fn commit_records(
        &self,
        category: Category,
        records: &[HealthRecord],
    ) -> Result<(), AppError>;

    async fn count_records(&self, user_id: &str, category: Category) -> Result<usize, AppError>;

    async fn get_watermark(
        &self,
        user_id: &str,
        category: Category,
    ) -> Result<Option<SyncWatermark>, AppError>;

    /// Store `watermark` if it is newer than the stored one.
    ///
    /// Returns whether the stored watermark moved.
    async fn advance_watermark(&self, watermark: &SyncWatermark) -> Result<bool, AppError>;
}
