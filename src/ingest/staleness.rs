/// Observation staleness detection.
///
/// WAQI monitors normally update hourly. A monitor that has stopped
/// reporting keeps its last value on the map, so a reading that is too
/// old must be dropped rather than fed into the regression as if it
/// were current.
///
/// # Clock injection
/// `is_stale_at` takes `now` explicitly instead of calling `Utc::now()`.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses an observation timestamp.
///
/// Accepts RFC 3339 (`2024-06-05T12:00:00-04:00`) and the bare
/// `2024-06-05 12:00:00` form, which is taken as UTC.
pub fn parse_observation_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("unparseable observation time '{}': {}", raw, e))
}

/// Returns `true` if an observation is older than `max_age_minutes`
/// relative to `now`.
///
/// Staleness is strictly greater than the threshold: an observation
/// exactly `max_age_minutes` old is still fresh. Observations stamped
/// in the future (clock skew at the source) are fresh.
pub fn is_stale_at(observed_at: DateTime<Utc>, max_age_minutes: u64, now: DateTime<Utc>) -> bool {
    let age_minutes = (now - observed_at).num_minutes();
    age_minutes > 0 && age_minutes as u64 > max_age_minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// A fixed "now" used across all tests: 2024-06-05 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_recent_observation_is_not_stale() {
        let observed = parse_observation_time("2024-06-05T12:00:00+00:00").unwrap();
        assert!(!is_stale_at(observed, 180, fixed_now()));
    }

    #[test]
    fn test_observation_exactly_at_threshold_is_not_stale() {
        let observed = parse_observation_time("2024-06-05T10:00:00+00:00").unwrap();
        assert!(
            !is_stale_at(observed, 180, fixed_now()),
            "age == threshold should not be stale, staleness is strictly greater than"
        );
    }

    #[test]
    fn test_observation_one_minute_past_threshold_is_stale() {
        let observed = parse_observation_time("2024-06-05T09:59:00+00:00").unwrap();
        assert!(is_stale_at(observed, 180, fixed_now()));
    }

    #[test]
    fn test_offset_timestamp_is_converted_to_utc() {
        // 09:00 Eastern daylight time == 13:00 UTC, zero minutes old.
        let observed = parse_observation_time("2024-06-05T09:00:00-04:00").unwrap();
        assert_eq!(observed, fixed_now());
        assert!(!is_stale_at(observed, 0, fixed_now()));
    }

    #[test]
    fn test_bare_timestamp_is_taken_as_utc() {
        let observed = parse_observation_time("2024-06-05 12:30:00").unwrap();
        assert_eq!(observed, Utc.with_ymd_and_hms(2024, 6, 5, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_future_observation_is_fresh() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 5, 15, 0, 0).unwrap();
        assert!(!is_stale_at(observed, 60, fixed_now()));
    }

    #[test]
    fn test_unparseable_time_is_rejected() {
        assert!(parse_observation_time("not-a-datetime").is_err());
        assert!(parse_observation_time("").is_err());
        assert!(parse_observation_time("2024-06-05").is_err());
    }
}
