//! Calendar-month windows: the unit of caching and upstream fetching.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{WindError, WindResult};

/// Half-open UTC range `[start_utc, end_utc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) -> WindResult<Self> {
        if start_utc >= end_utc {
            return Err(WindError::InvalidRange {
                start: start_utc.to_rfc3339(),
                end: end_utc.to_rfc3339(),
            });
        }
        Ok(Self { start_utc, end_utc })
    }

    /// The calendar month containing `instant`.
    pub fn month_of(instant: DateTime<Utc>) -> Self {
        let start_utc = start_of_month(instant);
        Self { start_utc, end_utc: next_month_start(start_utc) }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start_utc && instant < self.end_utc
    }

    /// `(year, month)` of the window start.
    pub fn month_key(&self) -> (i32, u32) {
        (self.start_utc.year(), self.start_utc.month())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start_utc.to_rfc3339(), self.end_utc.to_rfc3339())
    }
}

pub fn start_of_month(value: DateTime<Utc>) -> DateTime<Utc> {
    month_start(value.year(), value.month())
}

pub fn next_month_start(value: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if value.month() == 12 {
        (value.year() + 1, 1)
    } else {
        (value.year(), value.month() + 1)
    };
    month_start(year, month)
}

pub fn previous_month_start(value: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if value.month() == 1 {
        (value.year() - 1, 12)
    } else {
        (value.year(), value.month() - 1)
    };
    month_start(year, month)
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Midnight on the first of a month is never ambiguous in UTC.
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Split `[start_utc, end_utc)` into the calendar months that intersect it.
///
/// The first window starts on the 1st of `start_utc`'s month and the last ends
/// on the 1st of the month after `end_utc`, so every window is a whole month.
pub fn split(start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) -> WindResult<Vec<TimeWindow>> {
    if start_utc >= end_utc {
        return Err(WindError::InvalidRange {
            start: start_utc.to_rfc3339(),
            end: end_utc.to_rfc3339(),
        });
    }

    let limit = next_month_start(end_utc);
    let mut windows = Vec::new();
    let mut cursor = start_of_month(start_utc);
    while cursor < limit {
        let window_end = next_month_start(cursor);
        windows.push(TimeWindow { start_utc: cursor, end_utc: window_end });
        cursor = window_end;
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_split_three_months() {
        let windows = split(at(2024, 1, 1, 0), at(2024, 3, 15, 0)).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start_utc, at(2024, 1, 1, 0));
        assert_eq!(windows[1].start_utc, at(2024, 2, 1, 0));
        assert_eq!(windows[1].end_utc, at(2024, 3, 1, 0));
        assert_eq!(windows[2].end_utc, at(2024, 4, 1, 0));
    }

    #[test]
    fn test_split_year_boundary() {
        let windows = split(at(2023, 12, 20, 5), at(2024, 1, 2, 0)).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start_utc, at(2023, 12, 1, 0));
        assert_eq!(windows[1].end_utc, at(2024, 2, 1, 0));
    }

    #[rstest]
    #[case(at(2024, 1, 1, 0), at(2024, 1, 1, 0))]
    #[case(at(2024, 2, 1, 0), at(2024, 1, 1, 0))]
    fn test_split_rejects_empty_or_inverted(#[case] start: DateTime<Utc>, #[case] end: DateTime<Utc>) {
        assert!(matches!(split(start, end), Err(WindError::InvalidRange { .. })));
    }

    #[rstest]
    #[case(at(2024, 1, 15, 3), at(2023, 12, 1, 0))]
    #[case(at(2024, 3, 31, 23), at(2024, 2, 1, 0))]
    fn test_previous_month_start(#[case] value: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
        assert_eq!(previous_month_start(value), expected);
    }

    #[test]
    fn test_month_of_contains() {
        let w = TimeWindow::month_of(at(2024, 2, 29, 23));
        assert_eq!(w.start_utc, at(2024, 2, 1, 0));
        assert!(w.contains(at(2024, 2, 29, 23)));
        assert!(!w.contains(at(2024, 3, 1, 0)));
        assert_eq!(w.month_key(), (2024, 2));
    }

    proptest! {
        #[test]
        fn prop_windows_tile_without_gaps(start in 0i64..2_000_000_000, span in 1i64..200_000_000) {
            let start = Utc.timestamp_opt(start, 0).unwrap();
            let end = start + chrono::Duration::seconds(span);
            let windows = split(start, end).unwrap();

            prop_assert_eq!(windows[0].start_utc, start_of_month(start));
            prop_assert_eq!(windows[windows.len() - 1].end_utc, next_month_start(end));
            for w in &windows {
                prop_assert!(w.start_utc < w.end_utc);
                prop_assert_eq!(w.start_utc, start_of_month(w.start_utc));
                prop_assert_eq!(w.end_utc, next_month_start(w.start_utc));
            }
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end_utc, pair[1].start_utc);
            }
        }
    }
}
