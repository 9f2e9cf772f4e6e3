use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// `days` calendar days either side of `center`.
    pub fn around(center: NaiveDate, days: i64) -> Self {
        let days = days.abs();
        DateRange {
            start: center - Duration::days(days),
            end: center + Duration::days(days),
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn date_range_contains() {
        let range = DateRange::new(d(2024, 1, 1), d(2024, 12, 31));
        assert!(range.contains(d(2024, 6, 15)));
        assert!(range.contains(d(2024, 1, 1))); // inclusive start
        assert!(range.contains(d(2024, 12, 31))); // inclusive end
        assert!(!range.contains(d(2023, 12, 31)));
        assert!(!range.contains(d(2025, 1, 1)));
    }

    #[test]
    fn around_spans_month_boundary() {
        let range = DateRange::around(d(2025, 3, 1), 1);
        assert_eq!(range.start, d(2025, 2, 28));
        assert_eq!(range.end, d(2025, 3, 2));
        assert!(!range.contains(d(2025, 3, 3)));
    }

    #[test]
    fn date_range_display() {
        let range = DateRange::new(d(2024, 1, 1), d(2024, 12, 31));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}
