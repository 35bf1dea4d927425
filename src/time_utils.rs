// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
///
/// Sub-second digits are kept at full precision (and omitted when zero) so
/// two updates inside the same millisecond still order correctly.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a stored or remote timestamp into UTC.
///
/// Values without an offset (written by older tooling) are taken as UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_zulu_and_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_utc("2024-01-02T00:00:00Z"), Some(expected));
        assert_eq!(parse_utc("2024-01-01T19:00:00-05:00"), Some(expected));
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_utc("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_utc("2024-01-02 03:04:05.000"), Some(expected));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_utc("yesterday"), None);
        assert_eq!(parse_utc(""), None);
    }

    #[test]
    fn test_format_roundtrips_through_parse() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let text = format_utc_rfc3339(now);
        assert_eq!(text, "2024-06-30T12:00:00Z");
        assert_eq!(parse_utc(&text), Some(now));
    }

    #[test]
    fn test_format_keeps_sub_millisecond_precision() {
        let earlier = parse_utc("2024-01-02T00:00:00.123456Z").unwrap();
        let later = parse_utc("2024-01-02T00:00:00.123457Z").unwrap();

        let earlier_text = format_utc_rfc3339(earlier);
        assert_eq!(earlier_text, "2024-01-02T00:00:00.123456Z");
        assert!(parse_utc(&format_utc_rfc3339(later)) > parse_utc(&earlier_text));
    }
}
