//! Fixed-cadence frame sequences for animated wind playback.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use strum::Display;

use super::aggregate::regroup;
use super::calendar;
use super::math::{toward_bearing, velocity_components};
use crate::domain::{Measurement, PlaybackStep, TimeAggregation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FrameQuality {
    Observed,
    Aggregated,
    GapFilled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackFrame {
    pub datetime: DateTime<FixedOffset>,
    pub speed_mps: Option<f64>,
    /// Bearing the wind blows toward.
    pub direction_deg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub quality: FrameQuality,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityCounts {
    pub observed: usize,
    pub aggregated: usize,
    pub gap_filled: usize,
}

impl QualityCounts {
    pub fn tally(frames: &[PlaybackFrame]) -> Self {
        frames.iter().fold(Self::default(), |mut counts, f| {
            match f.quality {
                FrameQuality::Observed => counts.observed += 1,
                FrameQuality::Aggregated => counts.aggregated += 1,
                FrameQuality::GapFilled => counts.gap_filled += 1,
            }
            counts
        })
    }
}

pub fn frame_count(start: DateTime<Utc>, end: DateTime<Utc>, step: PlaybackStep) -> usize {
    if end <= start {
        return 0;
    }
    let span = (end - start).num_seconds();
    let step_secs = step.duration().num_seconds().max(1);
    (span / step_secs) as usize + 1
}

/// Coarsen `requested` until the frame count fits `max_frames`.
pub fn coerce_step(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    requested: PlaybackStep,
    max_frames: usize,
) -> PlaybackStep {
    let mut step = requested;
    while frame_count(start, end, step) > max_frames {
        match step.coarser() {
            Some(next) => step = next,
            None => break,
        }
    }
    step
}

/// Aggregation that feeds a playback step.
pub fn source_aggregation(step: PlaybackStep) -> TimeAggregation {
    match step {
        PlaybackStep::TenMinutes => TimeAggregation::None,
        PlaybackStep::Hourly | PlaybackStep::ThreeHourly => TimeAggregation::Hourly,
        PlaybackStep::Daily => TimeAggregation::Daily,
    }
}

pub fn floor_to_step(instant: DateTime<Utc>, step: PlaybackStep, tz: Tz) -> DateTime<Utc> {
    match step {
        PlaybackStep::TenMinutes => calendar::floor_minutes(instant, tz, 10),
        PlaybackStep::Hourly => calendar::floor_hours(instant, tz, 1),
        PlaybackStep::ThreeHourly => calendar::floor_hours(instant, tz, 3),
        PlaybackStep::Daily => calendar::floor_day(instant, tz),
    }
}

fn advance(cursor: DateTime<Utc>, step: PlaybackStep, tz: Tz) -> DateTime<Utc> {
    match step {
        PlaybackStep::Daily => calendar::next_local_day(cursor, tz),
        other => cursor + other.duration(),
    }
}

/// Hourly rows regrouped onto the local 3-hour grid.
pub fn regroup_three_hourly(hourly: Vec<Measurement>, tz: Tz) -> Vec<Measurement> {
    regroup(hourly, |t| calendar::floor_hours(t, tz, 3))
}

/// Frames on the step grid from the floored `start` through `end`.
///
/// A slot without a row repeats the last observation and is marked
/// `GapFilled`; slots before the first observation stay empty.
pub fn build_frames(
    rows: &[Measurement],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: PlaybackStep,
    tz: Tz,
) -> Vec<PlaybackFrame> {
    let by_slot: HashMap<DateTime<Utc>, &Measurement> =
        rows.iter().map(|r| (floor_to_step(r.measured_at_utc, step, tz), r)).collect();
    let native = if step == PlaybackStep::TenMinutes {
        FrameQuality::Observed
    } else {
        FrameQuality::Aggregated
    };

    let mut frames = Vec::with_capacity(frame_count(start, end, step));
    let mut last_observed: Option<&Measurement> = None;
    let mut cursor = floor_to_step(start, step, tz);
    while cursor <= end {
        let (row, quality) = match by_slot.get(&cursor) {
            Some(row) => {
                last_observed = Some(row);
                (Some(*row), native)
            }
            None => (last_observed, FrameQuality::GapFilled),
        };
        let direction = row.and_then(|r| r.direction_deg).map(toward_bearing);
        let speed = row.and_then(|r| r.speed_mps);
        let (dx, dy) = velocity_components(speed, direction);
        frames.push(PlaybackFrame {
            datetime: cursor.with_timezone(&tz).fixed_offset(),
            speed_mps: speed,
            direction_deg: direction,
            temperature_c: row.and_then(|r| r.temperature_c),
            pressure_hpa: row.and_then(|r| r.pressure_hpa),
            quality,
            dx,
            dy,
        });

        let next = advance(cursor, step, tz);
        if next <= cursor {
            break;
        }
        cursor = next;
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(t(1, 0, 0), t(2, 0, 0), PlaybackStep::Hourly), 25);
        assert_eq!(frame_count(t(1, 0, 0), t(1, 0, 0), PlaybackStep::Hourly), 0);
        assert_eq!(frame_count(t(1, 0, 0), t(1, 0, 30), PlaybackStep::Hourly), 1);
    }

    #[test]
    fn test_step_coarsens_until_frames_fit() {
        let start = t(1, 0, 0);
        // 30 days of 10-minute frames is 4321; hourly is 721.
        assert_eq!(
            coerce_step(start, start + Duration::days(30), PlaybackStep::TenMinutes, 1500),
            PlaybackStep::Hourly
        );
        // Two years at 3h is 5841 frames, daily is 731.
        assert_eq!(
            coerce_step(start, start + Duration::days(730), PlaybackStep::TenMinutes, 1500),
            PlaybackStep::Daily
        );
        assert_eq!(
            coerce_step(start, start + Duration::days(20_000), PlaybackStep::Daily, 1500),
            PlaybackStep::Daily
        );
    }

    #[test]
    fn test_gap_slots_carry_last_observation() {
        let rows = vec![
            Measurement::new("89064", t(1, 0, 0)).with_wind(10.0, Some(270.0)),
            Measurement::new("89064", t(1, 2, 0)).with_wind(4.0, Some(0.0)),
        ];

        let frames = build_frames(&rows, t(1, 0, 0), t(1, 3, 0), PlaybackStep::Hourly, chrono_tz::UTC);

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].quality, FrameQuality::Aggregated);
        // From the west means blowing toward the east.
        assert_eq!(frames[0].direction_deg, Some(90.0));
        assert_eq!((frames[0].dx, frames[0].dy), (Some(10.0), Some(0.0)));
        assert_eq!(frames[1].quality, FrameQuality::GapFilled);
        assert_eq!(frames[1].speed_mps, Some(10.0));
        assert_eq!(frames[2].direction_deg, Some(180.0));
        assert_eq!(frames[2].dy, Some(-4.0));
        assert_eq!(frames[3].quality, FrameQuality::GapFilled);

        let counts = QualityCounts::tally(&frames);
        assert_eq!(counts, QualityCounts { observed: 0, aggregated: 2, gap_filled: 2 });
    }

    #[test]
    fn test_leading_gap_is_empty() {
        let rows = vec![Measurement::new("89064", t(1, 1, 0)).with_wind(5.0, None)];
        let frames = build_frames(&rows, t(1, 0, 0), t(1, 1, 0), PlaybackStep::Hourly, chrono_tz::UTC);
        assert_eq!(frames[0].speed_mps, None);
        assert_eq!(frames[0].quality, FrameQuality::GapFilled);
        assert_eq!(frames[1].quality, FrameQuality::Aggregated);
    }

    #[test]
    fn test_ten_minute_frames_are_observed() {
        let rows = vec![Measurement::new("89064", t(1, 0, 10)).with_wind(5.0, None)];
        let frames = build_frames(&rows, t(1, 0, 10), t(1, 0, 10), PlaybackStep::TenMinutes, chrono_tz::UTC);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].quality, FrameQuality::Observed);
        assert_eq!((frames[0].dx, frames[0].dy), (None, None));
    }

    #[test]
    fn test_three_hour_regrouping() {
        let rows = vec![
            Measurement::new("89064", t(1, 0, 0)).with_wind(2.0, None),
            Measurement::new("89064", t(1, 2, 0)).with_wind(4.0, None),
            Measurement::new("89064", t(1, 3, 0)).with_wind(9.0, None),
        ];
        let grouped = regroup_three_hourly(rows, chrono_tz::UTC);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].speed_mps, Some(3.0));
        assert_eq!(grouped[1].measured_at_utc, t(1, 3, 0));
    }
}
