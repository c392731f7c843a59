//! Fixed-aligned usage windows.
//!
//! Each window type is a fixed duration; a window's start is "now" floored to
//! that duration. These are aligned buckets, not true rolling windows, so a
//! burst straddling a bucket boundary can under-count by up to one bucket.
//! That approximation is accepted: the counters drive advisory rate limiting,
//! not billing.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// The three sliding-window types usage is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    /// All window kinds, in ascending duration order.
    pub fn all() -> &'static [WindowKind] {
        &[Self::Minute, Self::Hour, Self::Day]
    }

    /// Fixed duration of this window in seconds.
    pub fn duration_secs(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// The string identifier used in fast-store keys and durable rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Window start: the given instant floored to this duration (epoch secs).
    pub fn window_start(&self, now: DateTime<Utc>) -> i64 {
        let ts = now.timestamp();
        ts - ts.rem_euclid(self.duration_secs())
    }

    /// Window end: start plus the fixed duration (epoch secs, exclusive).
    pub fn window_end(&self, now: DateTime<Utc>) -> i64 {
        self.window_start(now) + self.duration_secs()
    }

    /// Fast-store TTL for a bucket of this kind.
    ///
    /// Slightly longer than the window so stale buckets self-expire without
    /// explicit cleanup.
    pub fn ttl(&self, grace: Duration) -> Duration {
        Duration::from_secs(self.duration_secs() as u64) + grace
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            _ => Err(format!("Unknown window kind: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_durations() {
        assert_eq!(WindowKind::Minute.duration_secs(), 60);
        assert_eq!(WindowKind::Hour.duration_secs(), 3_600);
        assert_eq!(WindowKind::Day.duration_secs(), 86_400);
    }

    #[test]
    fn test_window_start_floors_to_duration() {
        // 2026-03-01 10:17:42 UTC
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 42).unwrap();

        let minute_start = WindowKind::Minute.window_start(now);
        assert_eq!(minute_start % 60, 0);
        assert_eq!(
            minute_start,
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 0).unwrap().timestamp()
        );

        let hour_start = WindowKind::Hour.window_start(now);
        assert_eq!(
            hour_start,
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap().timestamp()
        );

        let day_start = WindowKind::Day.window_start(now);
        assert_eq!(
            day_start,
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_window_end_is_start_plus_duration() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 42).unwrap();
        for kind in WindowKind::all() {
            assert_eq!(
                kind.window_end(now),
                kind.window_start(now) + kind.duration_secs()
            );
        }
    }

    #[test]
    fn test_instants_in_same_bucket_share_a_start() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 2).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 58).unwrap();
        assert_eq!(
            WindowKind::Minute.window_start(a),
            WindowKind::Minute.window_start(b)
        );

        let c = Utc.with_ymd_and_hms(2026, 3, 1, 10, 18, 0).unwrap();
        assert_ne!(
            WindowKind::Minute.window_start(a),
            WindowKind::Minute.window_start(c)
        );
    }

    #[test]
    fn test_ttl_exceeds_duration_by_grace() {
        let grace = Duration::from_secs(60);
        assert_eq!(WindowKind::Minute.ttl(grace), Duration::from_secs(120));
        assert_eq!(WindowKind::Day.ttl(grace), Duration::from_secs(86_460));
    }

    #[test]
    fn test_round_trip_str() {
        for kind in WindowKind::all() {
            assert_eq!(kind.as_str().parse::<WindowKind>().unwrap(), *kind);
        }
        assert!("week".parse::<WindowKind>().is_err());
    }
}
