//! Numeric helpers shared by the analytics builders.
//!
//! All reported statistics are rounded to three decimals; velocity components
//! to four.

use ordered_float::OrderedFloat;

/// Standard sea-level air density used when pressure or temperature is missing.
pub const STANDARD_AIR_DENSITY: f64 = 1.225;

/// Specific gas constant for dry air, J/(kg·K).
const DRY_AIR_GAS_CONSTANT: f64 = 287.05;

/// Vector sums below this magnitude are treated as perfectly cancelling.
const CANCELLATION_EPSILON: f64 = 1e-9;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn round3(value: f64) -> f64 {
    round_to(value, 3)
}

/// Arithmetic mean of the present values.
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| round3(sum / count as f64))
}

/// Nearest-rank percentile, no interpolation. `p` is a fraction in [0, 1].
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut ordered: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    ordered.sort_unstable();
    let rank = (p * ordered.len() as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, ordered.len() as i64 - 1) as usize;
    Some(round3(ordered[index].into_inner()))
}

pub fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().map(OrderedFloat).min().map(|v| round3(v.into_inner()))
}

pub fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().map(OrderedFloat).max().map(|v| round3(v.into_inner()))
}

/// Population standard deviation, only defined for more than one value.
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(round3(variance.sqrt()))
}

/// Circular mean of bearings in degrees, normalized to [0, 360).
///
/// Returns `None` for an empty input or when the unit vectors cancel out.
pub fn circular_mean_deg<I>(angles: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (x, y, count) = angles
        .into_iter()
        .flatten()
        .fold((0.0, 0.0, 0usize), |(x, y, n), a| {
            let rad = a.to_radians();
            (x + rad.cos(), y + rad.sin(), n + 1)
        });
    if count == 0 || x.hypot(y) < CANCELLATION_EPSILON * count as f64 {
        return None;
    }
    let degrees = round3(y.atan2(x).to_degrees().rem_euclid(360.0));
    Some(if degrees >= 360.0 { degrees - 360.0 } else { degrees })
}

/// Bearing the wind blows toward, from its meteorological "from" bearing.
pub fn toward_bearing(from_deg: f64) -> f64 {
    (from_deg + 180.0).rem_euclid(360.0)
}

/// Ideal-gas air density in kg/m³, `None` without both inputs or below 0 K.
pub fn air_density(pressure_hpa: Option<f64>, temperature_c: Option<f64>) -> Option<f64> {
    let (pressure, temperature) = (pressure_hpa?, temperature_c?);
    let kelvin = temperature + 273.15;
    if kelvin <= 0.0 {
        return None;
    }
    let density = pressure * 100.0 / (DRY_AIR_GAS_CONSTANT * kelvin);
    (density > 0.0).then_some(density)
}

/// `(dx, dy)` of a vector with magnitude `speed` pointing along `bearing_deg`.
pub fn velocity_components(speed: Option<f64>, bearing_deg: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (speed, bearing_deg) {
        (Some(s), Some(b)) => {
            let rad = b.rem_euclid(360.0).to_radians();
            (Some(round_to(s * rad.sin(), 4)), Some(round_to(s * rad.cos(), 4)))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_circular_mean_wraps_around_north() {
        assert_eq!(circular_mean_deg([Some(350.0), Some(10.0)]), Some(0.0));
    }

    #[test]
    fn test_circular_mean_of_opposites_is_undefined() {
        assert_eq!(circular_mean_deg([Some(0.0), Some(180.0)]), None);
        assert_eq!(circular_mean_deg([Some(90.0), Some(270.0)]), None);
    }

    #[test]
    fn test_circular_mean_ignores_missing() {
        assert_eq!(circular_mean_deg([None, Some(45.0), None]), Some(45.0));
        assert_eq!(circular_mean_deg(Vec::<Option<f64>>::new()), None);
    }

    #[rstest]
    #[case(0.9, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0], 9.0)]
    #[case(0.9, vec![5.0], 5.0)]
    #[case(0.5, vec![4.0, 1.0, 3.0, 2.0], 2.0)]
    #[case(0.0, vec![3.0, 1.0, 2.0], 1.0)]
    fn test_percentile_nearest_rank(#[case] p: f64, #[case] values: Vec<f64>, #[case] expected: f64) {
        assert_eq!(percentile(&values, p), Some(expected));
    }

    #[test]
    fn test_mean_rounds_and_skips_missing() {
        assert_eq!(mean([Some(1.0), None, Some(2.0), Some(2.0)]), Some(1.667));
        assert_eq!(mean([None, None]), None);
    }

    #[test]
    fn test_population_std_dev() {
        assert_eq!(population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), Some(2.0));
        assert_eq!(population_std_dev(&[3.0]), None);
    }

    #[test]
    fn test_air_density() {
        let rho = air_density(Some(1013.25), Some(15.0)).unwrap();
        assert!((rho - 1.225).abs() < 0.001);
        assert_eq!(air_density(None, Some(15.0)), None);
        assert_eq!(air_density(Some(1000.0), Some(-300.0)), None);
    }

    #[test]
    fn test_velocity_components() {
        assert_eq!(velocity_components(Some(10.0), Some(90.0)), (Some(10.0), Some(0.0)));
        assert_eq!(velocity_components(Some(10.0), None), (None, None));
        assert_eq!(toward_bearing(270.0), 90.0);
    }
}
