//! Time parsing utilities.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a backend `expiresAt` value.
///
/// Accepts RFC 3339 and naive ISO-8601 (read as UTC):
/// - "2026-01-31T12:45:31.053Z"
/// - "2026-01-31T12:45:31+01:00"
/// - "2026-01-31T12:45:31.053412"
pub fn parse_expires_at(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::parse_expires_at;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parse_rfc3339_with_z_suffix() {
        let parsed = parse_expires_at("2026-01-31T12:45:31.053Z").unwrap();
        assert_eq!(parsed.hour(), 12);
    }

    #[test]
    fn parse_rfc3339_with_offset() {
        let parsed = parse_expires_at("2026-01-31T12:45:31+01:00").unwrap();
        assert_eq!(parsed.hour(), 11);
    }

    #[test]
    fn parse_naive_isoformat_as_utc() {
        let parsed = parse_expires_at("2026-01-31T12:45:31.053412").unwrap();
        assert_eq!(parsed.day(), 31);
        assert_eq!(parsed.hour(), 12);

        let no_fraction = parse_expires_at("2026-01-31T12:45:31").unwrap();
        assert_eq!(no_fraction.second(), 31);
    }

    #[test]
    fn parse_invalid() {
        assert!(parse_expires_at("not a timestamp").is_none());
        assert!(parse_expires_at("2026-01-31").is_none());
        assert!(parse_expires_at("").is_none());
    }
}
