//! AEMET OpenData client for the Antarctic station endpoint.
//!
//! Every fetch is two requests: a metadata call that answers with a temporary
//! `datos` URL, then the download of that URL. Both pass through the shared
//! [`PacingGate`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::pacing::{advertised_retry_after, PacingGate};
use super::{UpstreamError, WeatherSource};
use crate::config::UpstreamConfig;
use crate::domain::Measurement;

const NAME_KEYS: &[&str] = &["nombre", "name", "estacion", "stationname"];
const DATETIME_KEYS: &[&str] = &["fhora", "fecha", "datetime", "timestamp", "instante"];
const TEMPERATURE_KEYS: &[&str] = &["temp", "temperatura", "temperature", "ta", "tair"];
const PRESSURE_KEYS: &[&str] = &["pres", "presion", "pressure", "patm"];
const SPEED_KEYS: &[&str] = &["vel", "windspeed", "speed", "vv", "ff"];
const DIRECTION_KEYS: &[&str] = &["ddd", "dir", "direccion", "direction", "dd", "dv"];
const LATITUDE_KEYS: &[&str] = &["lat", "latitud", "latitude"];
const LONGITUDE_KEYS: &[&str] = &["lon", "long", "longitud", "longitude"];
const ALTITUDE_KEYS: &[&str] = &["alt", "altitud", "altitude"];

const CSV_DELIMITERS: &[u8] = b";,\t|";
const CSV_HEADER_SCAN_LINES: usize = 40;

static EMBEDDED_NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[-+]?[0-9]+(?:[.,][0-9]+)?").ok());
static PACKED_DMS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^([0-9]+)([NSEW])$").ok());

/// Metadata answer from the OpenData API.
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    estado: Option<Value>,
    #[serde(default)]
    descripcion: Option<String>,
    #[serde(default)]
    datos: Option<String>,
}

pub struct AemetClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    gate: Arc<PacingGate>,
    retry_after_cap: Duration,
}

impl AemetClient {
    pub fn new(cfg: &UpstreamConfig, gate: Arc<PacingGate>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .context("failed to build AEMET HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key().map(str::to_string),
            gate,
            retry_after_cap: cfg.retry_after_cap(),
        })
    }

    fn endpoint(&self, station_id: &str, start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) -> String {
        format!(
            "{}/antartida/datos/fechaini/{}/fechafin/{}/estacion/{}",
            self.base_url,
            start_utc.format("%Y-%m-%dT%H:%M:%SUTC"),
            end_utc.format("%Y-%m-%dT%H:%M:%SUTC"),
            station_id
        )
    }

    /// One paced GET returning the body text.
    async fn paced_get(&self, url: &str, api_key: Option<&str>, context: &str) -> Result<String, UpstreamError> {
        let mut permit = self.gate.acquire().await;
        let mut request = self.client.get(url);
        if let Some(key) = api_key {
            request = request.query(&[("api_key", key)]);
        }
        let response = request.send().await.map_err(|e| transport_error(e, context))?;

        let status = response.status();
        if !status.is_success() {
            let advertised = advertised_retry_after(response.headers(), self.retry_after_cap);
            if status.as_u16() == 429 {
                permit.cooldown(self.gate.retry_after(response.headers(), self.retry_after_cap));
            }
            return Err(UpstreamError::from_status(status.as_u16(), advertised, context));
        }

        response.text().await.map_err(|e| transport_error(e, context))
    }
}

fn transport_error(error: reqwest::Error, context: &str) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Transient { status: 504 }
    } else {
        UpstreamError::Permanent(format!("{context} failed: {error}"))
    }
}

#[async_trait]
impl WeatherSource for AemetClient {
    #[instrument(skip(self))]
    async fn fetch(
        &self,
        station_id: &str,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, UpstreamError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| UpstreamError::Permanent("AEMET API key is not configured".to_string()))?;

        let endpoint = self.endpoint(station_id, start_utc, end_utc);
        debug!(station = %station_id, "requesting AEMET metadata URL");
        let body = self.paced_get(&endpoint, Some(api_key), "AEMET metadata request").await?;
        let metadata: MetadataResponse = serde_json::from_str(&body)
            .map_err(|_| UpstreamError::Permanent("AEMET metadata response is not valid JSON".to_string()))?;

        let Some(data_url) = metadata.datos.as_deref().filter(|u| !u.is_empty()).map(str::to_string) else {
            if is_no_data_answer(&metadata) {
                info!(station = %station_id, "AEMET returned no data for requested window");
                return Ok(Vec::new());
            }
            let mut detail = "AEMET response missing 'datos' URL".to_string();
            if let Some(estado) = &metadata.estado {
                detail.push_str(&format!(". estado={estado}"));
            }
            if let Some(descripcion) = &metadata.descripcion {
                detail.push_str(&format!(". descripcion={descripcion}"));
            }
            return Err(UpstreamError::Permanent(detail));
        };

        debug!(station = %station_id, "downloading AEMET data from temporary URL");
        let payload = self.paced_get(&data_url, None, "AEMET data download").await?;
        let rows = parse_rows(&payload)?;
        let mapped: Vec<Measurement> = rows.iter().filter_map(|row| map_row(station_id, row)).collect();
        info!(station = %station_id, raw = rows.len(), mapped = mapped.len(), "AEMET window fetched");
        Ok(mapped)
    }
}

fn is_no_data_answer(metadata: &MetadataResponse) -> bool {
    let estado_404 = match &metadata.estado {
        Some(Value::Number(n)) => n.as_i64() == Some(404),
        Some(Value::String(s)) => s.trim() == "404",
        _ => false,
    };
    estado_404
        && metadata
            .descripcion
            .as_deref()
            .map(|d| d.to_lowercase().contains("no hay datos"))
            .unwrap_or(false)
}

/// Extract row objects from a JSON array, a JSON string holding an array,
/// an object wrapping a single array, newline-delimited JSON, or delimited text.
fn parse_rows(payload: &str) -> Result<Vec<Map<String, Value>>, UpstreamError> {
    let text = payload.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => parse_rows(&inner),
        Ok(value) => rows_from_value(value).ok_or_else(|| {
            let sample: String = text.chars().take(240).collect();
            UpstreamError::Permanent(format!("AEMET data payload has unexpected shape (sample={sample})"))
        }),
        Err(_) => {
            let rows: Vec<Map<String, Value>> = text
                .lines()
                .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            if !rows.is_empty() {
                return Ok(rows);
            }
            match parse_csv_rows(text) {
                Some(rows) => Ok(rows),
                None => Err(UpstreamError::Permanent(
                    "AEMET data payload is neither JSON nor delimited text".to_string(),
                )),
            }
        }
    }
}

fn best_delimiter(line: &str) -> Option<(u8, usize)> {
    CSV_DELIMITERS
        .iter()
        .map(|d| (*d, line.bytes().filter(|b| b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
}

/// Locate the header line and delimiter of a delimited payload.
///
/// A line naming both `indicativo` and `nombre` wins; otherwise the first
/// line with at least two separators is taken as the header.
fn detect_csv_header(text: &str) -> Option<(usize, u8)> {
    let candidates: Vec<&str> = text.lines().take(CSV_HEADER_SCAN_LINES).collect();
    let named = candidates.iter().enumerate().find_map(|(idx, line)| {
        let lower = line.to_lowercase();
        if lower.contains("indicativo") && lower.contains("nombre") {
            best_delimiter(line).map(|(d, _)| (idx, d))
        } else {
            None
        }
    });
    named.or_else(|| {
        candidates.iter().enumerate().find_map(|(idx, line)| match best_delimiter(line) {
            Some((d, count)) if count >= 2 => Some((idx, d)),
            _ => None,
        })
    })
}

fn parse_csv_rows(text: &str) -> Option<Vec<Map<String, Value>>> {
    let (header_idx, delimiter) = detect_csv_header(text)?;
    let body: Vec<&str> = text.lines().skip(header_idx).collect();
    let body = body.join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = reader.headers().ok()?.iter().map(|h| h.trim().to_string()).collect();

    let rows: Vec<Map<String, Value>> = reader
        .records()
        .filter_map(Result::ok)
        .filter(|record| record.iter().any(|field| !field.trim().is_empty()))
        .map(|record| {
            headers
                .iter()
                .zip(record.iter())
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, field)| (key.clone(), Value::String(field.trim().to_string())))
                .collect()
        })
        .collect();
    (!rows.is_empty()).then_some(rows)
}

fn rows_from_value(value: Value) -> Option<Vec<Map<String, Value>>> {
    match value {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
        ),
        Value::Object(map) => {
            let mut lists = map.into_iter().filter(|(_, v)| v.is_array());
            match (lists.next(), lists.next()) {
                (Some((_, only)), None) => rows_from_value(only),
                _ => None,
            }
        }
        _ => None,
    }
}

fn map_row(station_id: &str, row: &Map<String, Value>) -> Option<Measurement> {
    let normalized: Map<String, Value> = row
        .iter()
        .map(|(k, v)| (normalized_key(k), v.clone()))
        .collect();
    let first = |keys: &[&str]| -> Option<&Value> {
        keys.iter()
            .filter_map(|k| normalized.get(*k))
            .find(|v| !v.is_null() && v.as_str().map(|s| !s.trim().is_empty()).unwrap_or(true))
    };

    let measured_at_utc = first(DATETIME_KEYS).and_then(to_datetime)?;
    let mut measurement = Measurement::new(station_id, measured_at_utc);
    measurement.station_name = first(NAME_KEYS)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    measurement.temperature_c = first(TEMPERATURE_KEYS).and_then(to_float);
    measurement.pressure_hpa = first(PRESSURE_KEYS).and_then(to_float);
    measurement.speed_mps = first(SPEED_KEYS).and_then(to_float);
    measurement.direction_deg = first(DIRECTION_KEYS).and_then(to_direction_deg);
    measurement.latitude = first(LATITUDE_KEYS).and_then(|v| to_coordinate(v, false));
    measurement.longitude = first(LONGITUDE_KEYS).and_then(|v| to_coordinate(v, true));
    measurement.altitude_m = first(ALTITUDE_KEYS).and_then(to_float);
    Some(measurement)
}

/// Lowercase, fold Spanish accents and drop everything outside `[a-z0-9]`.
fn normalized_key(key: &str) -> String {
    key.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

fn to_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            s.replace(',', ".").parse::<f64>().ok().or_else(|| {
                let found = EMBEDDED_NUMBER.as_ref()?.find(s)?;
                found.as_str().replace(',', ".").parse::<f64>().ok()
            })
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Decimal degrees, also accepting packed `DDMMSSH` / `DDDMMSSH` strings.
fn to_coordinate(value: &Value, is_longitude: bool) -> Option<f64> {
    if let Some(raw) = value.as_str() {
        let raw = raw.trim().to_uppercase();
        if let Some(caps) = PACKED_DMS.as_ref().and_then(|re| re.captures(&raw)) {
            let digits = &caps[1];
            let deg_len = if is_longitude && digits.len() >= 7 { 3 } else { 2 };
            if digits.len() >= deg_len + 4 {
                let part = |range: std::ops::Range<usize>| digits[range].parse::<f64>().ok();
                let degrees = part(0..deg_len)?;
                let minutes = part(deg_len..deg_len + 2)?;
                let seconds = part(deg_len + 2..deg_len + 4)?;
                let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;
                if matches!(&caps[2], "S" | "W") {
                    decimal = -decimal;
                }
                return Some((decimal * 1e6).round() / 1e6);
            }
        }
    }
    to_float(value)
}

fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.trim_end_matches("UTC").trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

fn to_direction_deg(value: &Value) -> Option<f64> {
    if let Some(deg) = to_float(value) {
        return Some(deg.rem_euclid(360.0));
    }
    let token = value.as_str()?.trim().to_lowercase();
    let deg = match token.as_str() {
        "n" => 0.0,
        "nne" => 22.5,
        "ne" => 45.0,
        "ene" => 67.5,
        "e" => 90.0,
        "ese" => 112.5,
        "se" => 135.0,
        "sse" => 157.5,
        "s" => 180.0,
        "ssw" | "sso" => 202.5,
        "sw" | "so" => 225.0,
        "wsw" | "oso" => 247.5,
        "w" | "o" => 270.0,
        "wnw" | "ono" => 292.5,
        "nw" | "no" => 315.0,
        "nnw" | "nno" => 337.5,
        _ => return None,
    };
    Some(deg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_map_row_with_aliases() {
        let row = json!({
            "nombre": "JCI",
            "fhora": "2024-01-05T10:10:00+0000",
            "temp": -1.5,
            "pres": "987,4",
            "vel": 7.2,
            "dir": 370.0,
            "lat": -62.66,
        });
        let m = map_row("89064", row.as_object().unwrap()).unwrap();
        assert_eq!(m.measured_at_utc, Utc.with_ymd_and_hms(2024, 1, 5, 10, 10, 0).unwrap());
        assert_eq!(m.station_name, "JCI");
        assert_eq!(m.pressure_hpa, Some(987.4));
        assert_eq!(m.direction_deg, Some(10.0));
        assert_eq!(m.latitude, Some(-62.66));
        assert_eq!(m.altitude_m, None);
    }

    #[test]
    fn test_row_without_timestamp_is_dropped() {
        let row = json!({ "vel": 3.0 });
        assert!(map_row("89064", row.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_compass_direction_tokens() {
        assert_eq!(to_direction_deg(&json!("NNO")), Some(337.5));
        assert_eq!(to_direction_deg(&json!("sw")), Some(225.0));
        assert_eq!(to_direction_deg(&json!("calm")), None);
    }

    #[test]
    fn test_parse_rows_shapes() {
        assert_eq!(parse_rows(r#"[{"fhora":"2024-01-01T00:00:00"}]"#).unwrap().len(), 1);
        assert_eq!(parse_rows(r#"{"datos":[{"a":1},{"b":2}]}"#).unwrap().len(), 2);
        assert_eq!(parse_rows("{\"a\":1}\n{\"b\":2}\n").unwrap().len(), 2);
        assert_eq!(parse_rows(r#""[{\"a\":1}]""#).unwrap().len(), 1);
        assert!(parse_rows("not json").is_err());
        assert!(parse_rows("a;b\n").is_err());
        assert!(parse_rows("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rows_delimited_text() {
        let payload = "\u{feff}Datos de la estacion\n\
            indicativo;nombre;fhora;vv;dv\n\
            89064;JUAN CARLOS I;2024-01-02T00:00:00;5,2;180\n\
            ;;;;\n\
            89064;JUAN CARLOS I;2024-01-02T01:00:00;4,8;190\n";
        let rows = parse_rows(payload).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["nombre"], json!("JUAN CARLOS I"));

        let m = map_row("89064", &rows[1]).unwrap();
        assert_eq!(m.speed_mps, Some(4.8));
        assert_eq!(m.direction_deg, Some(190.0));
    }

    #[test]
    fn test_csv_header_without_station_columns() {
        let rows = parse_rows("fecha,vel,dir\n2024-01-02 00:00:00,3.5,90\n").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["vel"], json!("3.5"));
    }

    #[test]
    fn test_accented_and_decorated_keys() {
        let row = json!({
            " Fecha ": "2024-01-05T10:00:00",
            "Dirección": 45,
            "Presión (hPa)": "990,1",
            "Temperatura": "-2.5 ºC",
            "Vel.": "5.2 m/s",
        });
        let m = map_row("89064", row.as_object().unwrap()).unwrap();
        assert_eq!(m.direction_deg, Some(45.0));
        assert_eq!(m.temperature_c, Some(-2.5));
        assert_eq!(m.speed_mps, Some(5.2));
        // "presionhpa" is not an alias.
        assert_eq!(m.pressure_hpa, None);
        assert_eq!(normalized_key("Presión"), "presion");
    }

    #[test]
    fn test_numbers_embedded_in_text() {
        assert_eq!(to_float(&json!("5.2 m/s")), Some(5.2));
        assert_eq!(to_float(&json!("approx -3,5")), Some(-3.5));
        assert_eq!(to_float(&json!("n/a")), None);
    }

    #[test]
    fn test_packed_dms_coordinates() {
        assert_eq!(to_coordinate(&json!("623947S"), false), Some(-62.663056));
        assert_eq!(to_coordinate(&json!("0602321W"), true), Some(-60.389167));
        assert_eq!(to_coordinate(&json!("602321E"), true), Some(60.389167));
        assert_eq!(to_coordinate(&json!(-62.66), false), Some(-62.66));
        assert_eq!(to_coordinate(&json!("-62,66"), false), Some(-62.66));
    }

    #[test]
    fn test_no_data_answer() {
        let meta: MetadataResponse =
            serde_json::from_str(r#"{"estado":404,"descripcion":"No hay datos que satisfagan esos criterios"}"#).unwrap();
        assert!(is_no_data_answer(&meta));
        let meta: MetadataResponse = serde_json::from_str(r#"{"estado":401,"descripcion":"API key invalido"}"#).unwrap();
        assert!(!is_no_data_answer(&meta));
    }
}
