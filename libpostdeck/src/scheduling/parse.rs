//! Parsing of human-readable schedule times
//!
//! Accepted forms, tried in order:
//! - Unix timestamps: `1767225600`
//! - RFC 3339: `2026-01-01T09:00:00Z`
//! - Relative durations: `30m`, `+2h`, `1d 6h`
//! - Natural language: `tomorrow`, `next monday 10am`, `2026-01-01 15:00`

use chrono::{DateTime, Duration, Utc};

use crate::{PostdeckError, Result};

/// Parse a schedule string into an absolute time
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    parse_schedule_at(input, Utc::now())
}

/// Same as [`parse_schedule`] with an explicit reference time
pub fn parse_schedule_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostdeckError::InvalidInput(
            "Schedule time cannot be empty".to_string(),
        ));
    }

    if let Ok(timestamp) = input.parse::<i64>() {
        return DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
            PostdeckError::InvalidInput(format!("Timestamp out of range: {}", timestamp))
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(duration) = parse_duration(input.strip_prefix('+').unwrap_or(input)) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        PostdeckError::InvalidInput(format!("Could not parse schedule time '{}': {}", input, e))
    })
}

/// Parse `ACCOUNT=TIME` as used by `deck-queue schedule --at`
pub fn parse_override(input: &str) -> Result<(String, i64)> {
    let (account, time) = input.split_once('=').ok_or_else(|| {
        PostdeckError::InvalidInput(format!("Expected ACCOUNT=TIME, got '{}'", input))
    })?;

    let account = account.trim();
    if account.is_empty() {
        return Err(PostdeckError::InvalidInput(format!(
            "Missing account in '{}'",
            input
        )));
    }

    Ok((account.to_string(), parse_schedule(time)?.timestamp()))
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input).map_err(|e| {
        PostdeckError::InvalidInput(format!("Could not parse duration '{}': {}", input, e))
    })?;

    Duration::from_std(std_duration)
        .map_err(|_| PostdeckError::InvalidInput("Duration out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn test_unix_timestamp() {
        let parsed = parse_schedule_at("1767225600", reference()).unwrap();
        assert_eq!(parsed.timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_rfc3339() {
        let parsed = parse_schedule_at("2026-01-01T09:00:00+02:00", reference()).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-01T07:00:00+00:00");
    }

    #[test]
    fn test_relative_durations() {
        let now = reference();
        assert_eq!(parse_schedule_at("30m", now).unwrap(), now + Duration::minutes(30));
        assert_eq!(parse_schedule_at("+2h", now).unwrap(), now + Duration::hours(2));
        assert_eq!(
            parse_schedule_at("1d 6h", now).unwrap(),
            now + Duration::hours(30)
        );
    }

    #[test]
    fn test_natural_language() {
        let now = reference();
        let parsed = parse_schedule_at("tomorrow", now).unwrap();
        assert!(parsed > now);
        assert!(parsed - now <= Duration::hours(48));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(
            parse_schedule_at("  ", reference()),
            Err(PostdeckError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_schedule_at("whenever you feel like it", reference()),
            Err(PostdeckError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_override() {
        let (account, at) = parse_override("acc-1=1767225600").unwrap();
        assert_eq!(account, "acc-1");
        assert_eq!(at, 1_767_225_600);

        assert!(parse_override("no-separator").is_err());
        assert!(parse_override("=1767225600").is_err());
        assert!(parse_override("acc-1=not a time at all").is_err());
    }
}
