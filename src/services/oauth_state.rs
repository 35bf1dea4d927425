// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-time CSRF state values for the OAuth authorization flow.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::time::Instant;

use crate::error::AppError;

/// How long an issued state value is accepted.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(30 * 60);

const STATE_BYTES: usize = 32;

/// Issued, not yet consumed state values.
pub struct OAuthStateStore {
    rng: SystemRandom,
    issued: DashMap<String, Instant>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            rng: SystemRandom::new(),
            issued: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh random state value.
    pub fn issue(&self) -> Result<String, AppError> {
        let mut bytes = [0u8; STATE_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to generate OAuth state: {:?}", e)))?;

        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.issued.insert(state.clone(), Instant::now());
        Ok(state)
    }

    /// Consume `state`. True only for a known value younger than the TTL;
    /// a value can be taken once.
    pub fn take(&self, state: &str) -> bool {
        match self.issued.remove(state) {
            Some((_, issued_at)) => issued_at.elapsed() <= self.ttl,
            None => false,
        }
    }

    /// Drop expired values. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.issued.len();
        self.issued
            .retain(|_, issued_at| issued_at.elapsed() <= self.ttl);
        before.saturating_sub(self.issued.len())
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}
