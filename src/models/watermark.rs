// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Category;
use crate::time_utils::{format_utc_rfc3339, parse_utc};

/// Latest `updated_at` successfully merged for one user and category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub user_id: String,
    pub category: Category,
    /// RFC 3339, UTC
    pub updated_at: String,
}

impl SyncWatermark {
    pub fn new(user_id: &str, category: Category, updated_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            category,
            updated_at: format_utc_rfc3339(updated_at),
        }
    }

    /// Document ID in the `sync_watermarks` collection.
    pub fn doc_id(user_id: &str, category: Category) -> String {
        format!("{}_{}", urlencoding::encode(user_id), category.as_str())
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_utc(&self.updated_at)
    }

    /// Whether writing `self` over `stored` moves the watermark forward.
    pub fn advances(&self, stored: Option<&SyncWatermark>) -> bool {
        let Some(candidate) = self.updated_at_utc() else {
            return false;
        };
        match stored.and_then(SyncWatermark::updated_at_utc) {
            Some(current) => candidate > current,
            None => true,
        }
    }
}
