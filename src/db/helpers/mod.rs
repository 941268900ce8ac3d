use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};

use crate::db::models::{ActiveDays, ChallengeMode};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Event timestamps are stored as epoch milliseconds so range queries stay numeric.
pub fn to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_millis(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| anyhow!("{field} contains out-of-range timestamp {value}"))
}

pub fn parse_challenge_mode(value: &str) -> Result<ChallengeMode> {
    value
        .parse()
        .with_context(|| format!("unknown challenge mode {value}"))
}

pub fn parse_active_days(value: &str) -> Result<ActiveDays> {
    ActiveDays::parse(value).with_context(|| format!("invalid schedule days '{value}'"))
}

pub fn to_hour(value: i64, field: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{field} contains invalid hour {value}"))
}

/// Lifts a conversion error into the rusqlite error type for row mappers.
pub fn conversion_error(column: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_keeps_precision() {
        let now = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        assert_eq!(from_millis(to_millis(now), "ts").unwrap(), now);
    }

    #[test]
    fn integer_conversions_reject_out_of_range() {
        assert!(to_i64(u64::MAX).is_err());
        assert!(to_u64(-1, "duration").is_err());
        assert!(to_hour(300, "start_hour").is_err());
        assert_eq!(to_hour(23, "start_hour").unwrap(), 23);
    }
}
