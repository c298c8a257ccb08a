//! Wind-farm energy estimate from a measured speed series.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

use super::math::{air_density, round3, STANDARD_AIR_DENSITY};
use crate::domain::Measurement;
use crate::error::{WindError, WindResult};

const FALLBACK_STEP_HOURS: f64 = 10.0 / 60.0;
const MAX_STEP_HOURS: f64 = 24.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_envelope"))]
pub struct WindFarmParams {
    #[validate(range(min = 1, max = 500))]
    pub turbine_count: u32,
    pub rated_power_kw: f64,
    pub cut_in_speed_mps: f64,
    pub rated_speed_mps: f64,
    pub cut_out_speed_mps: f64,
    #[serde(default = "default_reference_density")]
    pub reference_air_density_kgm3: f64,
    #[serde(default = "default_min_temp")]
    pub min_operating_temp_c: Option<f64>,
    #[serde(default = "default_max_temp")]
    pub max_operating_temp_c: Option<f64>,
    #[serde(default = "default_min_pressure")]
    pub min_operating_pressure_hpa: Option<f64>,
    #[serde(default = "default_max_pressure")]
    pub max_operating_pressure_hpa: Option<f64>,
}

fn default_reference_density() -> f64 {
    STANDARD_AIR_DENSITY
}

fn default_min_temp() -> Option<f64> {
    Some(-40.0)
}

fn default_max_temp() -> Option<f64> {
    Some(45.0)
}

fn default_min_pressure() -> Option<f64> {
    Some(850.0)
}

fn default_max_pressure() -> Option<f64> {
    Some(1085.0)
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_envelope(params: &WindFarmParams) -> Result<(), ValidationError> {
    if !(params.rated_power_kw > 0.0) {
        return Err(invalid("rated_power", "ratedPowerKw must be greater than 0."));
    }
    if !(params.cut_in_speed_mps >= 0.0) {
        return Err(invalid("power_curve", "cutInSpeedMps must not be negative."));
    }
    if params.cut_in_speed_mps >= params.rated_speed_mps {
        return Err(invalid("power_curve", "cutInSpeedMps must be lower than ratedSpeedMps."));
    }
    if params.rated_speed_mps >= params.cut_out_speed_mps {
        return Err(invalid("power_curve", "ratedSpeedMps must be lower than cutOutSpeedMps."));
    }
    if !(params.reference_air_density_kgm3 > 0.0) {
        return Err(invalid("density", "referenceAirDensityKgM3 must be greater than 0."));
    }
    if let (Some(min), Some(max)) = (params.min_operating_temp_c, params.max_operating_temp_c) {
        if min >= max {
            return Err(invalid("envelope", "minOperatingTempC must be lower than maxOperatingTempC."));
        }
    }
    if let (Some(min), Some(max)) = (params.min_operating_pressure_hpa, params.max_operating_pressure_hpa) {
        if min >= max {
            return Err(invalid(
                "envelope",
                "minOperatingPressureHpa must be lower than maxOperatingPressureHpa.",
            ));
        }
    }
    Ok(())
}

impl WindFarmParams {
    /// Reject parameter sets that cannot describe a physical power curve.
    pub fn ensure_valid(&self) -> WindResult<()> {
        self.validate()
            .map_err(|errors| WindError::validation(format!("invalid wind farm parameters: {errors}")))
    }

    pub fn rated_total_kw(&self) -> f64 {
        self.turbine_count as f64 * self.rated_power_kw
    }

    /// Only values present on the row are checked.
    pub fn within_envelope(&self, row: &Measurement) -> bool {
        let below = |value: Option<f64>, limit: Option<f64>| matches!((value, limit), (Some(v), Some(l)) if v < l);
        let above = |value: Option<f64>, limit: Option<f64>| matches!((value, limit), (Some(v), Some(l)) if v > l);
        !(below(row.temperature_c, self.min_operating_temp_c)
            || above(row.temperature_c, self.max_operating_temp_c)
            || below(row.pressure_hpa, self.min_operating_pressure_hpa)
            || above(row.pressure_hpa, self.max_operating_pressure_hpa))
    }

    /// Farm output in kW at `speed_mps` and air density `density`.
    pub fn power_kw(&self, speed_mps: f64, density: f64) -> f64 {
        let ratio = (density / self.reference_air_density_kgm3).max(0.0);
        let effective = speed_mps * ratio.powf(1.0 / 3.0);
        let (cut_in, rated, cut_out) = (self.cut_in_speed_mps, self.rated_speed_mps, self.cut_out_speed_mps);

        if effective < cut_in || effective >= cut_out {
            return 0.0;
        }
        if effective >= rated {
            return self.rated_total_kw();
        }
        let denom = rated.powi(3) - cut_in.powi(3);
        if denom <= 0.0 {
            return 0.0;
        }
        let share = ((effective.powi(3) - cut_in.powi(3)) / denom).clamp(0.0, 1.0);
        self.rated_total_kw() * share
    }
}

/// Estimated energy in MWh, `None` without rows.
///
/// Each point holds until the next one; gaps that are non-positive or longer
/// than a day fall back to the first plausible observed step.
pub fn estimate_generation_mwh(rows: &[Measurement], params: &WindFarmParams) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let mut ordered: Vec<&Measurement> = rows.iter().collect();
    ordered.sort_by_key(|r| r.measured_at_utc);

    let step_hours = |i: usize| -> Option<f64> {
        let next = ordered.get(i + 1)?;
        let hours = (next.measured_at_utc - ordered[i].measured_at_utc).num_seconds() as f64 / 3600.0;
        (hours > 0.0 && hours <= MAX_STEP_HOURS).then_some(hours)
    };
    let fallback = (0..ordered.len()).find_map(step_hours).unwrap_or(FALLBACK_STEP_HOURS);

    let energy_mwh: f64 = ordered
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let speed = row.speed_mps?;
            if !params.within_envelope(row) {
                return None;
            }
            let density = air_density(row.pressure_hpa, row.temperature_c)
                .unwrap_or(params.reference_air_density_kgm3);
            let hours = step_hours(i).unwrap_or(fallback);
            Some(params.power_kw(speed, density) * hours / 1000.0)
        })
        .sum();
    Some(round3(energy_mwh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn params() -> WindFarmParams {
        WindFarmParams {
            turbine_count: 10,
            rated_power_kw: 2000.0,
            cut_in_speed_mps: 3.0,
            rated_speed_mps: 12.0,
            cut_out_speed_mps: 25.0,
            reference_air_density_kgm3: STANDARD_AIR_DENSITY,
            min_operating_temp_c: Some(-40.0),
            max_operating_temp_c: Some(45.0),
            min_operating_pressure_hpa: Some(850.0),
            max_operating_pressure_hpa: Some(1085.0),
        }
    }

    fn series(speeds: &[f64]) -> Vec<Measurement> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        speeds
            .iter()
            .enumerate()
            .map(|(i, &s)| Measurement::new("89064", start + Duration::hours(i as i64)).with_wind(s, None))
            .collect()
    }

    #[test]
    fn test_rated_speed_gives_rated_farm_output() {
        let p = params();
        assert_eq!(p.power_kw(12.0, STANDARD_AIR_DENSITY), 20_000.0);
        assert_eq!(p.power_kw(2.9, STANDARD_AIR_DENSITY), 0.0);
        assert_eq!(p.power_kw(25.0, STANDARD_AIR_DENSITY), 0.0);
    }

    #[test]
    fn test_partial_load_on_cubic_curve() {
        let p = params();
        let expected = 20_000.0 * (8.0f64.powi(3) - 27.0) / (1728.0 - 27.0);
        assert!((p.power_kw(8.0, STANDARD_AIR_DENSITY) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_energy_integrates_hourly_steps() {
        // Two hours at rated output, the last point reuses the hourly step.
        let energy = estimate_generation_mwh(&series(&[12.0, 12.0]), &params());
        assert_eq!(energy, Some(40.0));
    }

    #[test]
    fn test_envelope_excludes_cold_rows() {
        let mut rows = series(&[12.0, 12.0]);
        rows[0].temperature_c = Some(-45.0);
        assert_eq!(estimate_generation_mwh(&rows, &params()), Some(20.0));
    }

    #[test]
    fn test_empty_series_has_no_estimate() {
        assert_eq!(estimate_generation_mwh(&[], &params()), None);
    }

    #[test]
    fn test_validation_rejects_inverted_curve() {
        let mut p = params();
        p.cut_in_speed_mps = 13.0;
        assert!(matches!(p.ensure_valid(), Err(WindError::Validation(_))));

        let mut p = params();
        p.turbine_count = 0;
        assert!(p.ensure_valid().is_err());

        let mut p = params();
        p.min_operating_pressure_hpa = Some(1100.0);
        assert!(p.ensure_valid().is_err());

        assert!(params().ensure_valid().is_ok());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let p: WindFarmParams = serde_json::from_str(
            r#"{"turbineCount":3,"ratedPowerKw":900,"cutInSpeedMps":3,"ratedSpeedMps":13,"cutOutSpeedMps":25}"#,
        )
        .unwrap();
        assert_eq!(p.reference_air_density_kgm3, 1.225);
        assert_eq!(p.max_operating_pressure_hpa, Some(1085.0));
    }
}
