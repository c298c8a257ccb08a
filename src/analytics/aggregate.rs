use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

use super::calendar;
use super::math::{circular_mean_deg, mean};
use crate::domain::{Measurement, TimeAggregation};

/// Collapse raw rows into hourly, daily or monthly buckets of the local civil
/// time in `tz`. `TimeAggregation::None` returns the rows unchanged.
pub fn aggregate(rows: Vec<Measurement>, granularity: TimeAggregation, tz: Tz) -> Vec<Measurement> {
    match granularity {
        TimeAggregation::None => rows,
        TimeAggregation::Hourly => regroup(rows, |t| calendar::floor_hours(t, tz, 1)),
        TimeAggregation::Daily => regroup(rows, |t| calendar::floor_day(t, tz)),
        TimeAggregation::Monthly => regroup(rows, |t| calendar::floor_month(t, tz)),
    }
}

/// Group rows by `bucket(measured_at_utc)` and collapse each group into one row
/// stamped with the bucket start. Output is ordered by bucket.
pub fn regroup<F>(rows: Vec<Measurement>, bucket: F) -> Vec<Measurement>
where
    F: Fn(DateTime<Utc>) -> DateTime<Utc>,
{
    let mut groups: BTreeMap<DateTime<Utc>, Vec<Measurement>> = BTreeMap::new();
    for row in rows {
        groups.entry(bucket(row.measured_at_utc)).or_default().push(row);
    }
    groups
        .into_iter()
        .filter_map(|(start, members)| collapse(start, &members))
        .collect()
}

fn collapse(start: DateTime<Utc>, members: &[Measurement]) -> Option<Measurement> {
    let first = members.first()?;
    Some(Measurement {
        station_id: first.station_id.clone(),
        station_name: first.station_name.clone(),
        measured_at_utc: start,
        temperature_c: mean(members.iter().map(|m| m.temperature_c)),
        pressure_hpa: mean(members.iter().map(|m| m.pressure_hpa)),
        speed_mps: mean(members.iter().map(|m| m.speed_mps)),
        direction_deg: circular_mean_deg(members.iter().map(|m| m.direction_deg)),
        latitude: first.latitude,
        longitude: first.longitude,
        altitude_m: first.altitude_m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, min, 0).unwrap()
    }

    #[test]
    fn test_hourly_bucket_averages_scalars_and_direction() {
        let rows = vec![
            Measurement::new("89064", at(0, 5)).with_wind(4.0, Some(350.0)).with_air(-1.0, 990.0),
            Measurement::new("89064", at(0, 15)).with_wind(6.0, Some(10.0)).with_air(-3.0, 992.0),
            Measurement::new("89064", at(1, 0)).with_wind(2.0, None),
        ];

        let out = aggregate(rows, TimeAggregation::Hourly, chrono_tz::UTC);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].measured_at_utc, at(0, 0));
        assert_eq!(out[0].speed_mps, Some(5.0));
        assert_eq!(out[0].direction_deg, Some(0.0));
        assert_eq!(out[0].temperature_c, Some(-2.0));
        assert_eq!(out[0].pressure_hpa, Some(991.0));
        assert_eq!(out[1].direction_deg, None);
    }

    #[test]
    fn test_daily_buckets_use_local_day() {
        let rows = vec![
            Measurement::new("89064", at(22, 50)).with_wind(1.0, None),
            Measurement::new("89064", at(23, 10)).with_wind(3.0, None),
        ];

        let out = aggregate(rows, TimeAggregation::Daily, chrono_tz::Europe::Madrid);

        assert_eq!(out.len(), 2);
        assert_eq!(out[1].measured_at_utc, at(23, 0));
    }

    #[test]
    fn test_none_passes_rows_through() {
        let rows = vec![Measurement::new("89064", at(0, 5)), Measurement::new("89064", at(0, 15))];
        assert_eq!(aggregate(rows.clone(), TimeAggregation::None, chrono_tz::UTC), rows);
    }

    #[test]
    fn test_first_row_supplies_coordinates() {
        let mut a = Measurement::new("89064", at(0, 5));
        a.latitude = Some(-62.66);
        let mut b = Measurement::new("89064", at(0, 15));
        b.latitude = Some(-1.0);
        let out = aggregate(vec![a, b], TimeAggregation::Hourly, chrono_tz::UTC);
        assert_eq!(out[0].latitude, Some(-62.66));
    }
}
