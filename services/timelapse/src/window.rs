use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use serde::Serialize;

/// Half-open interval `[start, end)` of last-modified times aggregated by one run.
///
/// `end` is the top of the hour after the reference time (in the layout's UTC
/// offset) and `start` lies exactly `hours` before it. A run at 14:37 with a
/// 24 hour window covers 15:00 yesterday (inclusive) to 15:00 today
/// (exclusive). Consecutive hourly runs therefore shift by whole hours and
/// an object stamped exactly on an hour boundary belongs to one side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AggregationWindow {
    /// Window of `hours` ending at the top of the hour following `reference`
    pub fn ending_after(reference: DateTime<Utc>, hours: u32, offset: FixedOffset) -> Self {
        let local = reference.with_timezone(&offset);
        let into_hour = Duration::minutes(i64::from(local.minute()))
            + Duration::seconds(i64::from(local.second()))
            + Duration::nanoseconds(i64::from(local.nanosecond()));

        let end = reference - into_hour + Duration::hours(1);
        let start = end - Duration::hours(i64::from(hours));

        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc8() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_window_is_hour_aligned() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 15, 6, 37, 12).unwrap();
        let window = AggregationWindow::ending_after(reference, 24, utc8());

        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 14, 7, 0, 0).unwrap());
        assert_eq!(window.duration(), Duration::hours(24));
    }

    #[test]
    fn test_boundaries_are_half_open() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 15, 6, 37, 12).unwrap();
        let window = AggregationWindow::ending_after(reference, 24, utc8());

        assert!(window.contains(window.start));
        assert!(!window.contains(window.start - Duration::milliseconds(1)));
        assert!(window.contains(window.end - Duration::milliseconds(1)));
        assert!(!window.contains(window.end));
        assert!(window.contains(reference));
    }

    #[test]
    fn test_reference_on_the_hour() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
        let window = AggregationWindow::ending_after(reference, 24, utc8());

        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap());
        assert!(window.contains(reference));
    }

    #[test]
    fn test_consecutive_runs_do_not_share_boundary_objects() {
        let first = AggregationWindow::ending_after(
            Utc.with_ymd_and_hms(2024, 1, 15, 5, 30, 0).unwrap(),
            1,
            utc8(),
        );
        let second = AggregationWindow::ending_after(
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap(),
            1,
            utc8(),
        );

        assert_eq!(first.end, second.start);
        assert!(!first.contains(second.start));
        assert!(second.contains(second.start));
    }

    #[test]
    fn test_half_hour_offset_aligns_to_local_hour() {
        // UTC+5:30
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let reference = Utc.with_ymd_and_hms(2024, 1, 15, 6, 45, 0).unwrap(); // 12:15 local
        let window = AggregationWindow::ending_after(reference, 24, offset);

        // 13:00 local
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap());
    }
}
