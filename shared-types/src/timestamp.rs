//! Normalization of the service's ISO-8601 timestamps.
//!
//! The service emits fractional seconds with anywhere from zero to seven
//! digits. Everything is parsed into `DateTime<Utc>` and truncated to
//! microseconds so that two readings of the same instant compare equal.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer};

const PRECISION: u16 = 6;

/// Parse a service timestamp into a microsecond-precision UTC instant.
///
/// Timestamps without an offset are read as UTC.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(with_offset) => with_offset.with_timezone(&Utc),
        Err(err) => match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            Ok(naive) => naive.and_utc(),
            Err(_) => return Err(err),
        },
    };
    Ok(parsed.trunc_subsecs(PRECISION))
}

/// Serde adapter for fields carrying a service timestamp.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_seven_fractional_digits() {
        let ts = parse("2022-02-18T22:38:59.9244932Z").unwrap();
        assert_eq!(ts.year(), 2022);
        assert_eq!(ts.second(), 59);
        assert_eq!(ts.nanosecond(), 924_493_000);
    }

    #[test]
    fn test_parse_varying_precision_normalizes() {
        let short = parse("2023-05-01T10:00:00.5Z").unwrap();
        let long = parse("2023-05-01T10:00:00.500000Z").unwrap();
        let longer = parse("2023-05-01T10:00:00.5000009Z").unwrap();
        assert_eq!(short, long);
        assert_eq!(long, longer);
    }

    #[test]
    fn test_parse_without_fraction() {
        let ts = parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_offset_is_converted() {
        let ts = parse("2024-01-01T02:00:00.25+02:00").unwrap();
        assert_eq!(ts.hour(), 0);
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let ts = parse("2024-03-04T05:06:07.123").unwrap();
        assert_eq!(ts.hour(), 5);
        assert_eq!(ts.nanosecond(), 123_000_000);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse("yesterday").is_err());
        assert!(parse("").is_err());
    }
}
