//! Static catalog of the Antarctic stations served by the upstream endpoint.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{WindError, WindResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StationRole {
    Meteo,
    Supplemental,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationProfile {
    pub station_id: String,
    pub station_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub role: StationRole,
    pub is_selectable: bool,
    pub primary_station_id: String,
    pub include_on_map: bool,
}

static KNOWN_STATIONS: Lazy<Vec<StationProfile>> = Lazy::new(|| {
    let juan = |id: &str, name: &str, role: StationRole, meteo: bool| StationProfile {
        station_id: id.to_string(),
        station_name: name.to_string(),
        latitude: -62.66325,
        longitude: -60.38959,
        altitude_m: 12.0,
        role,
        is_selectable: meteo,
        primary_station_id: "89064".to_string(),
        include_on_map: meteo,
    };
    vec![
        juan("89064", "Estación Meteorológica Juan Carlos I", StationRole::Meteo, true),
        juan("89064R", "Estación Radiométrica Juan Carlos I", StationRole::Supplemental, false),
        juan(
            "89064RA",
            "Estación Radiométrica Juan Carlos I (hasta 08/03/2007)",
            StationRole::Archive,
            false,
        ),
        StationProfile {
            station_id: "89070".to_string(),
            station_name: "Estación Meteorológica Gabriel de Castilla".to_string(),
            latitude: -62.97697,
            longitude: -60.67528,
            altitude_m: 12.0,
            role: StationRole::Meteo,
            is_selectable: true,
            primary_station_id: "89070".to_string(),
            include_on_map: true,
        },
    ]
});

/// Resolves station tokens and answers selectability questions.
#[derive(Debug, Clone, Default)]
pub struct StationPolicy;

impl StationPolicy {
    pub fn profiles(&self) -> &'static [StationProfile] {
        &KNOWN_STATIONS
    }

    pub fn profile(&self, station_id: &str) -> Option<&'static StationProfile> {
        KNOWN_STATIONS.iter().find(|p| p.station_id == station_id)
    }

    /// Canonical station id for an id or alias, case-insensitive.
    pub fn resolve(&self, token: &str) -> WindResult<String> {
        let normalized = token.trim().to_ascii_uppercase();
        let canonical = match normalized.as_str() {
            "JUAN-CARLOS-I" | "JUAN_CARLOS_I" => "89064",
            "GABRIEL-DE-CASTILLA" | "GABRIEL_DE_CASTILLA" => "89070",
            other => other,
        };
        self.profile(canonical)
            .map(|p| p.station_id.clone())
            .ok_or_else(|| WindError::validation(format!("Unsupported Antarctic station '{}'", token.trim())))
    }

    /// Resolve and additionally require the station to be selectable for analysis.
    pub fn resolve_selectable(&self, token: &str) -> WindResult<String> {
        let id = self.resolve(token)?;
        if !self.is_selectable(&id) {
            return Err(WindError::validation(format!(
                "Station '{id}' is catalog-only; choose one of {}",
                self.selectable_ids().join(", ")
            )));
        }
        Ok(id)
    }

    pub fn is_selectable(&self, station_id: &str) -> bool {
        self.profile(station_id).map(|p| p.is_selectable).unwrap_or(false)
    }

    pub fn selectable_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = KNOWN_STATIONS
            .iter()
            .filter(|p| p.is_selectable)
            .map(|p| p.station_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn map_station_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = KNOWN_STATIONS
            .iter()
            .filter(|p| p.include_on_map)
            .map(|p| p.station_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn display_name(&self, station_id: &str) -> String {
        self.profile(station_id)
            .map(|p| p.station_name.clone())
            .unwrap_or_else(|| station_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("89064", "89064")]
    #[case("juan-carlos-i", "89064")]
    #[case(" Gabriel-de-Castilla ", "89070")]
    #[case("89064ra", "89064RA")]
    fn test_resolve(#[case] token: &str, #[case] expected: &str) {
        assert_eq!(StationPolicy.resolve(token).unwrap(), expected);
    }

    #[test]
    fn test_unknown_station_is_validation_error() {
        assert!(matches!(StationPolicy.resolve("12345"), Err(WindError::Validation(_))));
    }

    #[test]
    fn test_only_meteo_stations_are_selectable() {
        let policy = StationPolicy;
        assert_eq!(policy.selectable_ids(), vec!["89064", "89070"]);
        assert_eq!(policy.map_station_ids(), vec!["89064", "89070"]);
        assert!(policy.resolve_selectable("89064R").is_err());
        assert_eq!(policy.resolve_selectable("89070").unwrap(), "89070");
    }
}
