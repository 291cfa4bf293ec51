//! ISO-8601 timestamp helpers
//!
//! Timestamps travel as strings so they survive export/import unchanged
//! and compare the way the store compares them. Everything written by this
//! crate uses one fixed shape (`2025-01-31T08:15:00.000Z`), so string order
//! and time order agree for our own records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Current time in the canonical string form.
pub fn now() -> String {
    format(Utc::now())
}

pub fn format(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse RFC 3339, or a zone-less date-time / date taken as UTC.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Whole days elapsed between `s` and `now`; `None` if unparseable.
pub fn days_since(s: &str, now: DateTime<Utc>) -> Option<i64> {
    parse(s).map(|t| (now - t).num_days())
}

/// Lexicographic recency check used when reconciling two views.
///
/// A missing candidate is never newer. A present candidate beats a
/// missing current value. Equal strings are not newer.
pub fn is_newer(candidate: Option<&str>, current: Option<&str>) -> bool {
    match candidate {
        None => false,
        Some(c) => c > current.unwrap_or(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_canonical_format() {
        let t = Utc.with_ymd_and_hms(2025, 1, 31, 8, 15, 0).unwrap();
        assert_eq!(format(t), "2025-01-31T08:15:00.000Z");
        assert_eq!(parse(&format(t)), Some(t));
    }

    #[test]
    fn test_parse_variants() {
        assert!(parse("2025-01-31T08:15:00+09:00").is_some());
        assert!(parse("2025-01-31T08:15:00").is_some());
        assert!(parse("2025-01-31").is_some());
        assert!(parse("last tuesday").is_none());
    }

    #[test]
    fn test_days_since_counts_whole_days() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let s = format(now - Duration::days(31) + Duration::hours(1));
        assert_eq!(days_since(&s, now), Some(30));
        let s = format(now - Duration::days(31));
        assert_eq!(days_since(&s, now), Some(31));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer(Some("2025-02-01T00:00:00.000Z"), Some("2025-01-01T00:00:00.000Z")));
        assert!(!is_newer(Some("2025-01-01T00:00:00.000Z"), Some("2025-01-01T00:00:00.000Z")));
        assert!(!is_newer(None, Some("2025-01-01T00:00:00.000Z")));
        assert!(!is_newer(None, None));
        assert!(is_newer(Some("2025-01-01T00:00:00.000Z"), None));
    }
}
