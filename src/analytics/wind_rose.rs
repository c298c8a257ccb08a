use serde::Serialize;

use super::math::round3;
use crate::domain::Measurement;

pub const SECTORS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpeedBuckets {
    pub calm: usize,
    pub breeze: usize,
    pub strong: usize,
    pub gale: usize,
}

impl SpeedBuckets {
    fn record(&mut self, speed: f64) {
        match speed {
            s if s < 3.0 => self.calm += 1,
            s if s < 8.0 => self.breeze += 1,
            s if s < 12.0 => self.strong += 1,
            _ => self.gale += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindRoseBin {
    pub sector: &'static str,
    pub speed_buckets: SpeedBuckets,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindRoseSummary {
    pub bins: Vec<WindRoseBin>,
    pub dominant_sector: Option<&'static str>,
    pub directional_concentration: Option<f64>,
    pub calm_share: Option<f64>,
}

/// Sector of a "from" bearing; N covers [348.75, 11.25).
pub fn sector_index(direction_deg: f64) -> usize {
    (((direction_deg + 11.25).rem_euclid(360.0)) / 22.5).floor() as usize % SECTORS.len()
}

/// 16-sector rose over rows carrying both speed and direction.
pub fn build_wind_rose(rows: &[Measurement]) -> WindRoseSummary {
    let mut bins: Vec<WindRoseBin> = SECTORS
        .iter()
        .map(|&sector| WindRoseBin { sector, speed_buckets: SpeedBuckets::default(), total_count: 0 })
        .collect();

    let mut directional = 0usize;
    let mut calm = 0usize;
    for row in rows {
        let (Some(speed), Some(direction)) = (row.speed_mps, row.direction_deg) else {
            continue;
        };
        let bin = &mut bins[sector_index(direction)];
        bin.speed_buckets.record(speed);
        bin.total_count += 1;
        directional += 1;
        if speed < 3.0 {
            calm += 1;
        }
    }

    // First sector wins ties.
    let dominant = bins
        .iter()
        .filter(|b| b.total_count > 0)
        .fold(None::<&WindRoseBin>, |best, b| match best {
            Some(current) if current.total_count >= b.total_count => Some(current),
            _ => Some(b),
        });

    let share = |count: usize| (directional > 0).then(|| round3(count as f64 / directional as f64));
    WindRoseSummary {
        dominant_sector: dominant.map(|b| b.sector),
        directional_concentration: dominant.and_then(|b| share(b.total_count)),
        calm_share: share(calm),
        bins,
    }
}
