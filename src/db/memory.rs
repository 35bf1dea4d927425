// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory storage backend.
//!
//! `commit_records` inserts one record at a time, so a concurrent reader can
//! observe part of a batch. Nothing in the service depends on batch
//! atomicity for correctness; the Firestore backend still commits
//! transactionally.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CredentialRepo, RecordRepo};
use crate::error::AppError;
use crate::models::{Category, Credential, HealthRecord, SyncWatermark};

/// Thread-safe in-memory implementation of both repositories.
#[derive(Default)]
pub struct MemoryDb {
    credentials: DashMap<String, Credential>,
    records: DashMap<(Category, String), HealthRecord>,
    watermarks: DashMap<String, SyncWatermark>,
    /// When set, `commit_records` fails with a database error
    fail_commits: AtomicBool,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential without going through the async repository API.
    pub fn insert_credential(&self, credential: Credential) {
        self.credentials.insert(credential.user_id.clone(), credential);
    }

    /// Make subsequent record commits fail (or succeed again).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialRepo for MemoryDb {
    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        Ok(self.credentials.get(user_id).map(|c| c.value().clone()))
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError> {
        self.insert_credential(credential.clone());
        Ok(())
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>, AppError> {
        let mut all: Vec<Credential> = self
            .credentials
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

#[async_trait]
impl RecordRepo for MemoryDb {
    async fn get_record(
        &self,
        category: Category,
        key: &str,
    ) -> Result<Option<HealthRecord>, AppError> {
        Ok(self
            .records
            .get(&(category, key.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn commit_records(
        &self,
        category: Category,
        records: &[HealthRecord],
    ) -> Result<(), AppError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AppError::Database(format!(
                "commit of {} {} records rejected",
                records.len(),
                category
            )));
        }
        for record in records {
            self.records
                .insert((category, record.key.clone()), record.clone());
        }
        Ok(())
    }

    async fn count_records(&self, user_id: &str, category: Category) -> Result<usize, AppError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == category && entry.value().user_id == user_id)
            .count())
    }

    async fn get_watermark(
        &self,
        user_id: &str,
        category: Category,
    ) -> Result<Option<SyncWatermark>, AppError> {
        Ok(self
            .watermarks
            .get(&SyncWatermark::doc_id(user_id, category))
            .map(|w| w.value().clone()))
    }

    async fn advance_watermark(&self, watermark: &SyncWatermark) -> Result<bool, AppError> {
        let doc_id = SyncWatermark::doc_id(&watermark.user_id, watermark.category);
        // The entry guard holds the shard lock across compare and write.
        match self.watermarks.entry(doc_id) {
            Entry::Vacant(slot) => {
                if !watermark.advances(None) {
                    return Ok(false);
                }
                slot.insert(watermark.clone());
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                if !watermark.advances(Some(slot.get())) {
                    return Ok(false);
                }
                slot.insert(watermark.clone());
                Ok(true)
            }
        }
    }
}
