// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Idempotent last-modified-wins upsert of fetched records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::RecordRepo;
use crate::error::AppError;
use crate::models::{Category, HealthRecord};

/// Result of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Inserts plus updates
    pub merged: usize,
    /// Records whose stored copy was as new or newer
    pub unchanged: usize,
    /// Newest `updated_at` among all input records
    pub max_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MergeEngine {
    repo: Arc<dyn RecordRepo>,
}

impl MergeEngine {
    pub fn new(repo: Arc<dyn RecordRepo>) -> Self {
        Self { repo }
    }

    /// Merge `records` into storage.
    ///
    /// A record replaces the stored one only when its `updated_at` is
    /// strictly newer. Earlier records of the same batch count as stored.
    /// All accepted writes go to the repository in a single commit.
    pub async fn merge(
        &self,
        category: Category,
        records: &[HealthRecord],
    ) -> Result<MergeOutcome, AppError> {
        let mut outcome = MergeOutcome::default();
        let mut pending: Vec<HealthRecord> = Vec::new();
        let mut pending_index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let Some(incoming) = record.updated_at_utc() else {
                tracing::warn!(
                    category = %category,
                    key = %record.key,
                    updated_at = %record.updated_at,
                    "Record has unparseable updated_at, not merged"
                );
                outcome.unchanged += 1;
                continue;
            };
            outcome.max_updated_at = outcome.max_updated_at.max(Some(incoming));

            let accept = match pending_index.get(&record.key) {
                Some(&i) => is_newer(incoming, &pending[i]),
                None => match self.repo.get_record(category, &record.key).await? {
                    Some(stored) => is_newer(incoming, &stored),
                    None => true,
                },
            };

            if !accept {
                outcome.unchanged += 1;
                continue;
            }

            outcome.merged += 1;
            match pending_index.get(&record.key) {
                Some(&i) => pending[i] = record.clone(),
                None => {
                    pending_index.insert(record.key.clone(), pending.len());
                    pending.push(record.clone());
                }
            }
        }

        if !pending.is_empty() {
            self.repo.commit_records(category, &pending).await?;
        }

        tracing::debug!(
            category = %category,
            merged = outcome.merged,
            unchanged = outcome.unchanged,
            "Merge complete"
        );

        Ok(outcome)
    }
}

/// Stored values that cannot be parsed lose to any incoming record.
fn is_newer(incoming: DateTime<Utc>, stored: &HealthRecord) -> bool {
    match stored.updated_at_utc() {
        Some(existing) => incoming > existing,
        None => true,
    }
}
