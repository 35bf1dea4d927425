// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user OAuth credential for the WHOOP API.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::time_utils::parse_utc;

/// A credential is only handed out when it has more than this long left.
pub const VALIDITY_BUFFER_SECS: i64 = 5 * 60;

/// OAuth credential stored per user (document ID = `user_id`).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// WHOOP user ID (also used as document ID)
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Usually "bearer"
    pub token_type: String,
    /// When the access token expires (RFC 3339, UTC)
    pub expires_at: String,
    /// Granted OAuth scopes
    pub scopes: Vec<String>,
    /// False once the refresh token was rejected or revoked
    pub active: bool,
    /// Last time this record was written (RFC 3339, UTC)
    pub updated_at: String,
}

impl Credential {
    /// Parsed expiry. Naive timestamps are taken as UTC.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_utc(&self.expires_at)
    }

    /// True when the credential is active and expires more than
    /// [`VALIDITY_BUFFER_SECS`] after `now`. An unparseable expiry is invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.expires_at_utc()
            .is_some_and(|expires| expires > now + Duration::seconds(VALIDITY_BUFFER_SECS))
    }

    /// True when the credential is active and expires within `buffer_hours` of `now`.
    pub fn is_due_for_refresh(&self, now: DateTime<Utc>, buffer_hours: i64) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at_utc() {
            Some(expires) => expires <= now + Duration::hours(buffer_hours),
            None => true,
        }
    }

    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
        }
    }

    /// Credential view without secrets, for the admin API.
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            user_id: self.user_id.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at.clone(),
            scopes: self.scopes.clone(),
            active: self.active,
            updated_at: self.updated_at.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("active", &self.active)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A usable access token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

impl AccessToken {
    /// Value for the `Authorization` header. WHOOP returns "bearer" in lower case.
    pub fn authorization_header(&self) -> String {
        let scheme = if self.token_type.is_empty() || self.token_type.eq_ignore_ascii_case("bearer")
        {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", scheme, self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Credential metadata returned by `GET /api/users`.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub user_id: String,
    pub token_type: String,
    pub expires_at: String,
    pub scopes: Vec<String>,
    pub active: bool,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::format_utc_rfc3339;
    use chrono::TimeZone;

    fn credential_expiring_at(expires: DateTime<Utc>) -> Credential {
        Credential {
            user_id: "42".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_at: format_utc_rfc3339(expires),
            scopes: vec!["offline".to_string()],
            active: true,
            updated_at: format_utc_rfc3339(expires),
        }
    }

    #[test]
    fn test_validity_buffer_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let four_minutes = credential_expiring_at(now + Duration::minutes(4));
        assert!(!four_minutes.is_valid_at(now));

        let six_minutes = credential_expiring_at(now + Duration::minutes(6));
        assert!(six_minutes.is_valid_at(now));

        let exactly_five = credential_expiring_at(now + Duration::minutes(5));
        assert!(!exactly_five.is_valid_at(now));
    }

    #[test]
    fn test_inactive_is_never_valid_or_due() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut credential = credential_expiring_at(now + Duration::hours(2));
        credential.active = false;

        assert!(!credential.is_valid_at(now));
        assert!(!credential.is_due_for_refresh(now, 24));
    }

    #[test]
    fn test_due_for_refresh_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert!(credential_expiring_at(now + Duration::hours(23)).is_due_for_refresh(now, 24));
        assert!(!credential_expiring_at(now + Duration::hours(25)).is_due_for_refresh(now, 24));
    }

    #[test]
    fn test_naive_expiry_is_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut credential = credential_expiring_at(now);
        credential.expires_at = "2024-03-01T09:00:00".to_string();
        assert!(credential.is_valid_at(now));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credential = credential_expiring_at(Utc::now());
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("access\""));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_authorization_header_normalizes_bearer() {
        let token = AccessToken {
            access_token: "abc".to_string(),
            token_type: "bearer".to_string(),
        };
        assert_eq!(token.authorization_header(), "Bearer abc");
    }
}
