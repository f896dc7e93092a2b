//! Time conversions for span timestamps (unix nanoseconds)

use chrono::{DateTime, Utc};

/// Nanoseconds since the Unix epoch as a UTC datetime
pub fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// `yyyyMMdd` day stamp of a nanosecond timestamp
pub fn nanos_to_day(nanos: i64) -> String {
    nanos_to_datetime(nanos).format("%Y%m%d").to_string()
}

/// `yyyyMMdd` day stamp of a millisecond timestamp
pub fn millis_to_day(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .unwrap_or_else(|| {
            tracing::warn!(millis, "Invalid timestamp, using epoch");
            DateTime::UNIX_EPOCH
        })
        .format("%Y%m%d")
        .to_string()
}

/// Current time in unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_nanos_to_datetime_known_value() {
        // 2024-01-01 00:00:00 UTC
        let dt = nanos_to_datetime(1_704_067_200 * 1_000_000_000);
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 1, 1));
    }

    #[test]
    fn test_day_stamps() {
        assert_eq!(nanos_to_day(1_704_067_200 * 1_000_000_000 + 1), "20240101");
        assert_eq!(millis_to_day(1_718_409_600_000), "20240615");
        assert_eq!(nanos_to_day(0), "19700101");
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01
        assert!(now_millis() > 1_577_836_800_000);
    }
}
