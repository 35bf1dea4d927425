// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod credential;
pub mod record;
pub mod watermark;

pub use credential::{AccessToken, Credential, CredentialSummary, VALIDITY_BUFFER_SECS};
pub use record::{Category, DecodeError, HealthRecord, RecordData};
pub use watermark::SyncWatermark;
