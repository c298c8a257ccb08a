use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One station observation as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub station_id: String,
    #[serde(default)]
    pub station_name: String,
    pub measured_at_utc: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub speed_mps: Option<f64>,
    /// Meteorological "wind from" bearing in [0, 360).
    pub direction_deg: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f64>,
}

impl Measurement {
    pub fn new(station_id: impl Into<String>, measured_at_utc: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.into(),
            station_name: String::new(),
            measured_at_utc,
            temperature_c: None,
            pressure_hpa: None,
            speed_mps: None,
            direction_deg: None,
            latitude: None,
            longitude: None,
            altitude_m: None,
        }
    }

    pub fn with_wind(mut self, speed_mps: f64, direction_deg: Option<f64>) -> Self {
        self.speed_mps = Some(speed_mps);
        self.direction_deg = direction_deg;
        self
    }

    pub fn with_air(mut self, temperature_c: f64, pressure_hpa: f64) -> Self {
        self.temperature_c = Some(temperature_c);
        self.pressure_hpa = Some(pressure_hpa);
        self
    }

    /// Blank out the scalar fields the caller did not ask for.
    ///
    /// An empty selection keeps every field. Station metadata and coordinates
    /// are always kept.
    pub fn project(mut self, selected: &[MeasurementType]) -> Self {
        if selected.is_empty() {
            return self;
        }
        if !selected.contains(&MeasurementType::Temperature) {
            self.temperature_c = None;
        }
        if !selected.contains(&MeasurementType::Pressure) {
            self.pressure_hpa = None;
        }
        if !selected.contains(&MeasurementType::Speed) {
            self.speed_mps = None;
        }
        if !selected.contains(&MeasurementType::Direction) {
            self.direction_deg = None;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementType {
    Temperature,
    Pressure,
    Speed,
    Direction,
}

/// True when the selection includes wind direction, either explicitly or by
/// selecting everything.
pub fn wants_direction(selected: &[MeasurementType]) -> bool {
    selected.is_empty() || selected.contains(&MeasurementType::Direction)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimeAggregation {
    #[default]
    None,
    Hourly,
    Daily,
    Monthly,
}

impl TimeAggregation {
    /// Nominal duration represented by one row at this granularity.
    pub fn point_hours(self) -> f64 {
        match self {
            TimeAggregation::None => 10.0 / 60.0,
            TimeAggregation::Hourly => 1.0,
            TimeAggregation::Daily => 24.0,
            TimeAggregation::Monthly => 730.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn sample() -> Measurement {
        Measurement::new("89064", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_wind(6.0, Some(180.0))
            .with_air(-2.0, 990.0)
    }

    #[test]
    fn test_empty_selection_keeps_all_fields() {
        let row = sample().project(&[]);
        assert_eq!(row.speed_mps, Some(6.0));
        assert_eq!(row.temperature_c, Some(-2.0));
    }

    #[test]
    fn test_projection_drops_unselected_fields() {
        let row = sample().project(&[MeasurementType::Speed]);
        assert_eq!(row.speed_mps, Some(6.0));
        assert_eq!(row.direction_deg, None);
        assert_eq!(row.temperature_c, None);
        assert_eq!(row.pressure_hpa, None);
    }

    #[test]
    fn test_wants_direction() {
        assert!(wants_direction(&[]));
        assert!(wants_direction(&[MeasurementType::Direction]));
        assert!(!wants_direction(&[MeasurementType::Speed]));
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(TimeAggregation::from_str("hourly").unwrap(), TimeAggregation::Hourly);
        assert_eq!(MeasurementType::Direction.to_string(), "direction");
    }
}
