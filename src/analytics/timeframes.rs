//! Calendar bucketing and period-over-period comparison.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use super::calendar;
use super::generation::{estimate_generation_mwh, WindFarmParams};
use super::math::{circular_mean_deg, max_of, mean, min_of, population_std_dev, round3};
use super::summary::SpeedStats;
use crate::domain::Measurement;

/// Raw rows arrive at 10-minute cadence.
const RAW_POINT_HOURS: f64 = 10.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimeframeGroupBy {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Season,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeBucket {
    pub label: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub data_points: usize,
    pub avg_speed: Option<f64>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub p90_speed: Option<f64>,
    pub hours_above_3mps: Option<f64>,
    pub hours_above_5mps: Option<f64>,
    pub speed_variability: Option<f64>,
    pub dominant_direction: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub estimated_generation_mwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonDelta {
    pub metric: &'static str,
    pub baseline: Option<f64>,
    pub current: Option<f64>,
    pub absolute_delta: Option<f64>,
    pub percent_delta: Option<f64>,
}

struct BucketKey {
    label: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

fn season_of(month: u32) -> (&'static str, u32) {
    match month {
        12 | 1 | 2 => ("DJF", 12),
        3..=5 => ("MAM", 3),
        6..=8 => ("JJA", 6),
        _ => ("SON", 9),
    }
}

fn bucket_key(instant: DateTime<Utc>, group_by: TimeframeGroupBy, tz: Tz) -> BucketKey {
    let local = instant.with_timezone(&tz);
    match group_by {
        TimeframeGroupBy::Hour => {
            let start = calendar::floor_hours(instant, tz, 1);
            BucketKey { label: local.format("%Y-%m-%d %H:00").to_string(), start, end: start + Duration::hours(1) }
        }
        TimeframeGroupBy::Day => {
            let start = calendar::floor_day(instant, tz);
            BucketKey { label: local.format("%Y-%m-%d").to_string(), start, end: calendar::next_local_day(start, tz) }
        }
        TimeframeGroupBy::Week => {
            let date = local.date_naive();
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            let start = calendar::local_midnight(monday, tz);
            BucketKey {
                label: format!("{}-W{:02}", monday.year(), monday.iso_week().week()),
                start,
                end: calendar::local_midnight(monday + Duration::days(7), tz),
            }
        }
        TimeframeGroupBy::Month => {
            let start = calendar::floor_month(instant, tz);
            BucketKey {
                label: local.format("%Y-%m").to_string(),
                start,
                end: calendar::add_local_months(start, tz, 1),
            }
        }
        TimeframeGroupBy::Season => {
            let (name, first_month) = season_of(local.month());
            // December opens the following year's DJF.
            let season_year = if local.month() == 12 { local.year() + 1 } else { local.year() };
            let start_year = if first_month == 12 { season_year - 1 } else { season_year };
            let start_date = NaiveDate::from_ymd_opt(start_year, first_month, 1).unwrap_or(local.date_naive());
            let start = calendar::local_midnight(start_date, tz);
            BucketKey {
                label: format!("{season_year}-{name}"),
                start,
                end: calendar::add_local_months(start, tz, 3),
            }
        }
    }
}

/// Bucket raw rows by local calendar period, ordered by bucket start.
///
/// Buckets are keyed in `station_tz`; their bounds are reported in `output_tz`.
pub fn group_buckets(
    rows: &[Measurement],
    group_by: TimeframeGroupBy,
    params: Option<&WindFarmParams>,
    station_tz: Tz,
    output_tz: Tz,
) -> Vec<TimeframeBucket> {
    let mut groups: BTreeMap<DateTime<Utc>, (BucketKey, Vec<Measurement>)> = BTreeMap::new();
    for row in rows {
        let key = bucket_key(row.measured_at_utc, group_by, station_tz);
        groups.entry(key.start).or_insert_with(|| (key, Vec::new())).1.push(row.clone());
    }

    groups
        .into_values()
        .map(|(key, members)| {
            let speed = SpeedStats::from_rows(&members, RAW_POINT_HOURS);
            let speeds: Vec<f64> = members.iter().filter_map(|r| r.speed_mps).collect();
            let temperatures: Vec<f64> = members.iter().filter_map(|r| r.temperature_c).collect();
            TimeframeBucket {
                label: key.label,
                start: key.start.with_timezone(&output_tz).fixed_offset(),
                end: key.end.with_timezone(&output_tz).fixed_offset(),
                data_points: members.len(),
                avg_speed: speed.avg,
                min_speed: speed.min,
                max_speed: speed.max,
                p90_speed: speed.p90,
                hours_above_3mps: speed.hours_above_3,
                hours_above_5mps: speed.hours_above_5,
                speed_variability: population_std_dev(&speeds),
                dominant_direction: circular_mean_deg(members.iter().map(|r| r.direction_deg)),
                avg_temperature: mean(temperatures.iter().copied().map(Some)),
                min_temperature: min_of(&temperatures),
                max_temperature: max_of(&temperatures),
                avg_pressure: mean(members.iter().map(|r| r.pressure_hpa)),
                estimated_generation_mwh: params.and_then(|p| estimate_generation_mwh(&members, p)),
            }
        })
        .collect()
}

/// Headline metrics of a whole period, keyed as they appear in comparisons.
pub fn period_metrics(rows: &[Measurement], params: Option<&WindFarmParams>) -> Vec<(&'static str, Option<f64>)> {
    let speed = SpeedStats::from_rows(rows, RAW_POINT_HOURS);
    vec![
        ("avgSpeed", speed.avg),
        ("p90Speed", speed.p90),
        ("hoursAbove5mps", speed.hours_above_5),
        ("estimatedGenerationMwh", params.and_then(|p| estimate_generation_mwh(rows, p))),
    ]
}

pub fn comparison_deltas(
    current: &[Measurement],
    baseline: &[Measurement],
    params: Option<&WindFarmParams>,
) -> Vec<ComparisonDelta> {
    period_metrics(current, params)
        .into_iter()
        .zip(period_metrics(baseline, params))
        .map(|((metric, current), (_, baseline))| delta(metric, baseline, current))
        .collect()
}

fn delta(metric: &'static str, baseline: Option<f64>, current: Option<f64>) -> ComparisonDelta {
    let absolute_delta = match (baseline, current) {
        (Some(b), Some(c)) => Some(round3(c - b)),
        _ => None,
    };
    let percent_delta = match (absolute_delta, baseline) {
        (Some(d), Some(b)) if b != 0.0 => Some(round3(d / b.abs() * 100.0)),
        _ => None,
    };
    ComparisonDelta { metric, baseline, current, absolute_delta, percent_delta }
}
