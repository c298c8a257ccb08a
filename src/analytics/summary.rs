use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::calendar;
use super::math::{
    air_density, circular_mean_deg, max_of, mean, min_of, percentile, round3, STANDARD_AIR_DENSITY,
};
use crate::domain::{Measurement, StationRole, TimeAggregation};

const MONTHLY_EXPECTED_CAP: usize = 240;

/// Speed statistics shared by the station summary and timeframe buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedStats {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    /// `None` when no row carries a speed.
    pub hours_above_3: Option<f64>,
    pub hours_above_5: Option<f64>,
}

impl SpeedStats {
    pub fn from_rows(rows: &[Measurement], point_hours: f64) -> Self {
        let speeds: Vec<f64> = rows.iter().filter_map(|r| r.speed_mps).collect();
        let above = |threshold: f64| {
            (!speeds.is_empty())
                .then(|| round3(speeds.iter().filter(|&&s| s >= threshold).count() as f64 * point_hours))
        };
        Self {
            avg: mean(speeds.iter().copied().map(Some)),
            min: min_of(&speeds),
            max: max_of(&speeds),
            p90: percentile(&speeds, 0.9),
            hours_above_3: above(3.0),
            hours_above_5: above(5.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeasibilitySummary {
    pub station_id: String,
    pub station_name: String,
    pub role: Option<StationRole>,
    pub data_points: usize,
    pub coverage_ratio: Option<f64>,
    pub avg_speed: Option<f64>,
    pub p90_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub hours_above_3mps: Option<f64>,
    pub hours_above_5mps: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub prevailing_direction: Option<f64>,
    pub wind_power_density: Option<f64>,
    pub latest_observation_utc: Option<DateTime<Utc>>,
}

/// Inputs that describe the series rather than its values.
#[derive(Debug, Clone)]
pub struct SummaryContext<'a> {
    pub station_id: &'a str,
    pub station_name: &'a str,
    pub role: Option<StationRole>,
    pub aggregation: TimeAggregation,
    pub coverage_start: DateTime<Utc>,
    pub coverage_end: DateTime<Utc>,
    pub latest_observation: Option<DateTime<Utc>>,
    pub tz: Tz,
}

/// Points a complete series would hold over `[start, end)` at `aggregation`.
pub fn expected_points(start: DateTime<Utc>, end: DateTime<Utc>, aggregation: TimeAggregation, tz: Tz) -> usize {
    if end <= start {
        return 0;
    }
    let seconds = (end - start).num_seconds().max(0) as usize;
    match aggregation {
        TimeAggregation::None => (seconds / 600).max(1),
        TimeAggregation::Hourly => (seconds / 3600).max(1),
        TimeAggregation::Daily => (seconds / 86_400).max(1),
        TimeAggregation::Monthly => {
            let mut cursor = calendar::floor_month(start, tz);
            let mut count = 0;
            while cursor < end && count < MONTHLY_EXPECTED_CAP {
                count += 1;
                let next = calendar::add_local_months(cursor, tz, 1);
                if next <= cursor {
                    break;
                }
                cursor = next;
            }
            count.max(1)
        }
    }
}

/// Mean of `0.5 · ρ · v³` over rows with speed, in W/m².
pub fn wind_power_density(rows: &[Measurement]) -> Option<f64> {
    mean(rows.iter().map(|r| {
        r.speed_mps.map(|v| {
            let rho = air_density(r.pressure_hpa, r.temperature_c).unwrap_or(STANDARD_AIR_DENSITY);
            0.5 * rho * v.powi(3)
        })
    }))
}

pub fn build_summary(rows: &[Measurement], ctx: &SummaryContext<'_>) -> FeasibilitySummary {
    let expected = expected_points(ctx.coverage_start, ctx.coverage_end, ctx.aggregation, ctx.tz);
    let coverage_ratio = (expected > 0).then(|| round3((rows.len() as f64 / expected as f64).min(1.0)));
    let speed = SpeedStats::from_rows(rows, ctx.aggregation.point_hours());
    let temperatures: Vec<f64> = rows.iter().filter_map(|r| r.temperature_c).collect();

    FeasibilitySummary {
        station_id: ctx.station_id.to_string(),
        station_name: ctx.station_name.to_string(),
        role: ctx.role,
        data_points: rows.len(),
        coverage_ratio,
        avg_speed: speed.avg,
        p90_speed: speed.p90,
        max_speed: speed.max,
        hours_above_3mps: speed.hours_above_3,
        hours_above_5mps: speed.hours_above_5,
        avg_temperature: mean(temperatures.iter().copied().map(Some)),
        min_temperature: min_of(&temperatures),
        max_temperature: max_of(&temperatures),
        avg_pressure: mean(rows.iter().map(|r| r.pressure_hpa)),
        prevailing_direction: circular_mean_deg(rows.iter().map(|r| r.direction_deg)),
        wind_power_density: wind_power_density(rows),
        latest_observation_utc: ctx.latest_observation,
    }
}
