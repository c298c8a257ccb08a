//! Civil-time truncation for bucketing UTC instants in a station's time zone.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// UTC instant of a local wall-clock time. Ambiguous times take the earlier
/// instant; times inside a DST gap are moved past it.
pub fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    resolve_local(date.and_time(chrono::NaiveTime::MIN), tz)
}

/// Truncate to a multiple of `minutes` within the local hour.
pub fn floor_minutes(instant: DateTime<Utc>, tz: Tz, minutes: u32) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    let seconds = (local.minute() % minutes) * 60 + local.second();
    instant - Duration::seconds(seconds as i64) - Duration::nanoseconds(local.nanosecond() as i64)
}

/// Truncate to a multiple of `hours` within the local day.
pub fn floor_hours(instant: DateTime<Utc>, tz: Tz, hours: u32) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    let seconds = (local.hour() % hours) * 3600 + local.minute() * 60 + local.second();
    instant - Duration::seconds(seconds as i64) - Duration::nanoseconds(local.nanosecond() as i64)
}

pub fn floor_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    local_midnight(instant.with_timezone(&tz).date_naive(), tz)
}

pub fn floor_month(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz).date_naive();
    local_midnight(local.with_day(1).unwrap_or(local), tz)
}

/// Local midnight of the same wall-clock date `months` later (day clamped).
pub fn add_local_months(instant: DateTime<Utc>, tz: Tz, months: u32) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz).naive_local();
    match local.checked_add_months(Months::new(months)) {
        Some(next) => resolve_local(next, tz),
        None => instant,
    }
}

pub fn next_local_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let date = instant.with_timezone(&tz).date_naive();
    match date.succ_opt() {
        Some(next) => local_midnight(next, tz),
        None => instant + Duration::days(1),
    }
}
