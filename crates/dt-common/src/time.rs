//! Lenient build-time parsing.
//!
//! Build times show up in two shapes depending on the index source: a
//! naive `%Y-%m-%dT%H:%M:%S%.f` (assumed UTC, as the Docker image
//! inspect API reports it) and a full RFC3339 string with an explicit
//! offset. Both must compare as absolute instants.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a build-time label value. Returns `None` if it is `"ND"` or
/// otherwise unparsable in either accepted format.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || raw == "ND" {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Docker's own timestamp format carries a trailing " UTC" tag and
    // nanosecond precision beyond what `%.f` parses in one pass; try the
    // plain naive form first since it covers the common case.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.fZ"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_naive_format() {
        let t = parse_time("2024-05-01T10:00:00.000000").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let t = parse_time("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn rejects_nd_and_garbage() {
        assert!(parse_time("ND").is_none());
        assert!(parse_time("").is_none());
        assert!(parse_time("not-a-time").is_none());
    }

    #[test]
    fn equal_instants_compare_equal_across_formats() {
        let a = parse_time("2024-05-01T10:00:00.000000").unwrap();
        let b = parse_time("2024-05-01T10:00:00+00:00").unwrap();
        assert_eq!(a, b);
    }
}
