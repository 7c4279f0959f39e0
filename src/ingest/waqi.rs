/// WAQI (World Air Quality Index) API client
///
/// Retrieves current PM2.5 conditions for every catalog station with a
/// single bounding-box query against the WAQI map endpoint, then matches
/// each catalog station to the nearest reporting monitor.
///
/// WAQI reports the US EPA AQI rather than concentrations, so values are
/// converted back to µg/m³ with the EPA PM2.5 breakpoints.
///
/// API Documentation: https://aqicn.org/json-api/doc/
/// Map bounds query: https://api.waqi.info/v2/map/bounds?latlng=...&token=...

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::WaqiConfig;
use crate::ingest::staleness::{is_stale_at, parse_observation_time};
use crate::logging::{self, DataSource};
use crate::model::{FetchError, Reading, Station};

pub const WAQI_BASE_URL: &str = "https://api.waqi.info";

const EARTH_RADIUS_KM: f64 = 6371.0;

// ============================================================================
// Reading source seam
// ============================================================================

/// Anything that can produce the latest readings for a set of stations.
///
/// Implementations make at most one outbound call per invocation and do
/// not retry; retry and backoff belong to whoever schedules refreshes.
pub trait ReadingSource: Send + Sync {
    /// Returns readings keyed by `station_id` for stations with a fresh
    /// observation. Stations without one are absent from the map.
    fn fetch_latest(&self, stations: &[Station]) -> Result<HashMap<String, Reading>, FetchError>;
}

// ============================================================================
// WAQI API Response Structures
// ============================================================================

/// Map bounds response. On failure `status` is `"error"` and `data` is a
/// message string instead of an array.
#[derive(Debug, Deserialize)]
pub struct WaqiBoundsResponse {
    pub status: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct WaqiBoundsEntry {
    pub lat: f64,
    pub lon: f64,
    /// Number, numeric string, or "-" when the monitor has no value.
    #[serde(default)]
    pub aqi: Value,
    #[serde(default)]
    pub station: WaqiStationInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaqiStationInfo {
    #[serde(default)]
    pub name: String,
    pub time: Option<String>,
}

/// A monitor from the bounds response, converted to µg/m³.
#[derive(Debug, Clone, PartialEq)]
pub struct WaqiMonitor {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub pm25: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Geometry
// ============================================================================

/// Geographic box in degrees, south-west to north-east.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Smallest box covering every station, padded on all sides.
    /// Returns `None` for an empty station set.
    pub fn covering(stations: &[Station], padding_deg: f64) -> Option<BoundingBox> {
        let first = stations.first()?;
        let mut bbox = BoundingBox {
            south: first.latitude,
            west: first.longitude,
            north: first.latitude,
            east: first.longitude,
        };
        for st in &stations[1..] {
            bbox.south = bbox.south.min(st.latitude);
            bbox.north = bbox.north.max(st.latitude);
            bbox.west = bbox.west.min(st.longitude);
            bbox.east = bbox.east.max(st.longitude);
        }
        Some(BoundingBox {
            south: bbox.south - padding_deg,
            west: bbox.west - padding_deg,
            north: bbox.north + padding_deg,
            east: bbox.east + padding_deg,
        })
    }

    /// `latlng` query value: `lat1,lng1,lat2,lng2` (SW corner, NE corner).
    pub fn latlng_param(&self) -> String {
        format!("{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// Great-circle distance in km between two lat/lon points.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

// ============================================================================
// AQI conversion
// ============================================================================

/// US EPA PM2.5 breakpoints: (aqi_lo, aqi_hi, conc_lo, conc_hi).
const AQI_BREAKPOINTS: &[(f64, f64, f64, f64)] = &[
    (0.0, 50.0, 0.0, 12.0),
    (51.0, 100.0, 12.1, 35.4),
    (101.0, 150.0, 35.5, 55.4),
    (151.0, 200.0, 55.5, 150.4),
    (201.0, 300.0, 150.5, 250.4),
    (301.0, 400.0, 250.5, 350.4),
    (401.0, 500.0, 350.5, 500.4),
];

/// Converts a PM2.5 AQI value to µg/m³, rounded to one decimal.
///
/// Above 500 AQI there is no breakpoint; the AQI value is used as-is.
pub fn aqi_to_ugm3(aqi: i64) -> f64 {
    if aqi <= 0 {
        return 0.0;
    }
    let aqi = aqi as f64;
    for &(aqi_lo, aqi_hi, c_lo, c_hi) in AQI_BREAKPOINTS {
        if aqi >= aqi_lo && aqi <= aqi_hi {
            let conc = (aqi - aqi_lo) * (c_hi - c_lo) / (aqi_hi - aqi_lo) + c_lo;
            return (conc * 10.0).round() / 10.0;
        }
    }
    aqi
}

fn parse_aqi(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

// ============================================================================
// Parsing and matching
// ============================================================================

/// Parses a map bounds response body into monitors.
///
/// Entries with no usable AQI ("-", null, negative) are skipped. An
/// error status from the API is returned as `FetchError::ApiError`.
pub fn parse_bounds_response(body: &str) -> Result<Vec<WaqiMonitor>, FetchError> {
    let response: WaqiBoundsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::ParseError(e.to_string()))?;

    if response.status != "ok" {
        let message = match &response.data {
            Value::String(msg) => msg.clone(),
            _ => response.status.clone(),
        };
        return Err(FetchError::ApiError(message));
    }

    let entries: Vec<Value> = match response.data {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(FetchError::ParseError(format!(
                "expected data array, got {}",
                other
            )));
        }
    };

    let mut monitors = Vec::new();
    for raw in entries {
        // Malformed entries are skipped individually rather than failing
        // the whole response.
        let Ok(entry) = serde_json::from_value::<WaqiBoundsEntry>(raw) else {
            continue;
        };
        let Some(aqi) = parse_aqi(&entry.aqi).filter(|aqi| *aqi >= 0) else {
            continue;
        };
        monitors.push(WaqiMonitor {
            name: entry.station.name,
            latitude: entry.lat,
            longitude: entry.lon,
            pm25: aqi_to_ugm3(aqi),
            observed_at: entry
                .station
                .time
                .as_deref()
                .and_then(|t| parse_observation_time(t).ok()),
        });
    }
    Ok(monitors)
}

/// Matches each station to the nearest fresh monitor within
/// `match_radius_km`.
///
/// Monitors without a parseable observation time, or older than
/// `max_age_minutes`, are ignored.
pub fn match_readings(
    stations: &[Station],
    monitors: &[WaqiMonitor],
    match_radius_km: f64,
    max_age_minutes: u64,
    now: DateTime<Utc>,
) -> HashMap<String, Reading> {
    let fresh: Vec<(&WaqiMonitor, DateTime<Utc>)> = monitors
        .iter()
        .filter_map(|m| m.observed_at.map(|t| (m, t)))
        .filter(|(_, t)| !is_stale_at(*t, max_age_minutes, now))
        .collect();

    let mut readings = HashMap::new();
    for st in stations {
        let nearest = fresh
            .iter()
            .map(|(m, t)| {
                let d = haversine_km(st.latitude, st.longitude, m.latitude, m.longitude);
                (d, *m, *t)
            })
            .filter(|(d, _, _)| *d < match_radius_km)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((_, monitor, observed_at)) = nearest {
            readings.insert(
                st.station_id.clone(),
                Reading {
                    station_id: st.station_id.clone(),
                    pm25: monitor.pm25.max(0.0),
                    observed_at,
                },
            );
        }
    }
    readings
}

// ============================================================================
// API Client
// ============================================================================

/// Blocking WAQI client. One bounds request per `fetch_latest` call.
pub struct WaqiFetcher {
    client: reqwest::blocking::Client,
    config: WaqiConfig,
}

impl WaqiFetcher {
    pub fn new(config: WaqiConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(WaqiFetcher { client, config })
    }

    /// Fetches and converts every monitor inside `bbox`.
    pub fn fetch_bounds(&self, bbox: &BoundingBox) -> Result<Vec<WaqiMonitor>, FetchError> {
        let token = self
            .config
            .api_key
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(FetchError::NotConfigured)?;

        let url = format!("{}/v2/map/bounds", self.config.base_url.trim_end_matches('/'));
        logging::debug(
            DataSource::Waqi,
            None,
            &format!("GET {} latlng={}", url, bbox.latlng_param()),
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latlng", bbox.latlng_param().as_str()),
                ("networks", "all"),
                ("token", token),
            ])
            .header("Accept", "application/json")
            .send()
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }

        let body = response.text().map_err(map_reqwest_error)?;
        parse_bounds_response(&body)
    }

    /// `fetch_latest` with an injected clock for the staleness check.
    pub fn fetch_latest_at(
        &self,
        stations: &[Station],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Reading>, FetchError> {
        let Some(bbox) = BoundingBox::covering(stations, self.config.bbox_padding_deg) else {
            return Ok(HashMap::new());
        };

        let monitors = self.fetch_bounds(&bbox)?;
        let readings = match_readings(
            stations,
            &monitors,
            self.config.match_radius_km,
            self.config.max_observation_age_minutes,
            now,
        );

        logging::info(
            DataSource::Waqi,
            None,
            &format!(
                "{} monitors in bounds, {}/{} stations matched",
                monitors.len(),
                readings.len(),
                stations.len()
            ),
        );
        Ok(readings)
    }
}

impl ReadingSource for WaqiFetcher {
    fn fetch_latest(&self, stations: &[Station]) -> Result<HashMap<String, Reading>, FetchError> {
        self.fetch_latest_at(stations, Utc::now())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        FetchError::HttpError(status.as_u16())
    } else {
        FetchError::Transport(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
