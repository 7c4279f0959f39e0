/// Core data types for the smoke early-warning service.
///
/// This module defines the shared domain model imported by all other
/// modules: stations and their regression models, live readings,
/// per-station predictions, per-city alert state, and the error types
/// that cross module boundaries. It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::alert::thresholds::AlertLevel;

// ---------------------------------------------------------------------------
// Station types
// ---------------------------------------------------------------------------

/// Station category by distance band.
///
/// Tier assignment comes from the regression table and is static per
/// station. Corridor stations are a separately designated category that
/// only Rule 3 looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1: regional stations, 100–600 km from the target city.
    Regional,
    /// Tier 2: distant stations, more than 600 km away.
    Distant,
    /// Upwind corridor stations for specific smoke sources.
    Corridor,
}

impl Tier {
    /// Parses the tier column of a regression table.
    ///
    /// Accepts `1`, `2`, `3`, `"Tier 1"`, `"tier 2"`, `"corridor"`.
    pub fn parse(raw: &str) -> Option<Tier> {
        let lower = raw.trim().to_lowercase();
        let stripped = lower.strip_prefix("tier").unwrap_or(&lower).trim();
        match stripped {
            "1" | "regional" => Some(Tier::Regional),
            "2" | "distant" => Some(Tier::Distant),
            "3" | "corridor" => Some(Tier::Corridor),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Regional => write!(f, "tier 1"),
            Tier::Distant => write!(f, "tier 2"),
            Tier::Corridor => write!(f, "corridor"),
        }
    }
}

/// Per-station linear regression against the target city's PM2.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient, -1..1.
    pub r: f64,
}

impl Regression {
    /// Applies the model to a raw reading, clamped so it never goes negative.
    pub fn predict(&self, pm25: f64) -> f64 {
        (self.slope * pm25 + self.intercept).max(0.0)
    }
}

/// A distant monitoring station with its model for one target city.
///
/// The same physical station may appear under several target cities,
/// each with its own coefficients; `station_id` is unique within a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    /// Compass bearing from the target city, e.g. "NW".
    pub bearing: String,
    pub tier: Tier,
    pub regression: Regression,
    pub target_city: String,
}

// ---------------------------------------------------------------------------
// Reading and result types
// ---------------------------------------------------------------------------

/// A live PM2.5 measurement matched to a catalog station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    /// µg/m³, never negative.
    pub pm25: f64,
    pub observed_at: DateTime<Utc>,
}

/// One station's prediction for its target city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub station_id: String,
    pub station_name: String,
    pub target_city: String,
    pub tier: Tier,
    pub distance_km: f64,
    pub bearing: String,
    pub r: f64,
    /// Raw reading at the station.
    pub pm25: f64,
    /// Predicted PM2.5 at the target city.
    pub predicted: f64,
    pub level: AlertLevel,
    pub lead_time: String,
    pub observed_at: DateTime<Utc>,
}

/// Which detection rule fired for a city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertRule {
    Rule1,
    Rule2,
    Rule3,
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertRule::Rule1 => write!(f, "rule1"),
            AlertRule::Rule2 => write!(f, "rule2"),
            AlertRule::Rule3 => write!(f, "rule3"),
        }
    }
}

/// Alert state for one target city after an evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityAlertState {
    pub city: String,
    pub active: bool,
    /// `None` means no rule fired.
    pub rule: Option<AlertRule>,
    pub trigger_stations: Vec<String>,
    pub lead_time: Option<String>,
    /// City-level prediction (the R-weighted average).
    pub predicted_pm25: f64,
    pub max_pm25: f64,
    pub level: AlertLevel,
}

/// The latest evaluation, as stored in the result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Worst (highest predicted) first.
    pub results: Vec<PredictionResult>,
    pub city_alerts: BTreeMap<String, CityAlertState>,
    pub computed_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        CachedResult {
            results: Vec::new(),
            city_alerts: BTreeMap::new(),
            computed_at,
        }
    }

    /// `true` when no station reported during the cycle.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors loading a city's regression table. Always scoped to one city.
#[derive(Debug, Clone, PartialEq)]
pub enum DataLoadError {
    /// The table file does not exist or cannot be read.
    TableMissing { city: String, path: String },
    /// The table exists but could not be parsed or is inconsistent.
    Malformed { city: String, reason: String },
    /// The city is not declared in the configuration.
    UnknownCity(String),
}

impl fmt::Display for DataLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLoadError::TableMissing { city, path } => {
                write!(f, "Regression table missing for {}: {}", city, path)
            }
            DataLoadError::Malformed { city, reason } => {
                write!(f, "Malformed regression table for {}: {}", city, reason)
            }
            DataLoadError::UnknownCity(city) => write!(f, "Unknown city: {}", city),
        }
    }
}

impl std::error::Error for DataLoadError {}

/// Errors from the live air-quality source.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// No API token is configured.
    NotConfigured,
    /// The request did not complete within the configured timeout.
    Timeout,
    /// Connection-level failure.
    Transport(String),
    /// Non-2xx HTTP response.
    HttpError(u16),
    /// The response body could not be deserialized.
    ParseError(String),
    /// The source answered but reported an error status.
    ApiError(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotConfigured => write!(f, "No WAQI API token configured"),
            FetchError::Timeout => write!(f, "Request timeout"),
            FetchError::Transport(msg) => write!(f, "Transport error: {}", msg),
            FetchError::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            FetchError::ApiError(msg) => write!(f, "API error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

/// Errors surfaced by the engine and the service facade.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    DataLoad(DataLoadError),
    Fetch(FetchError),
    /// Zero stations reported for the city.
    NoDataAvailable(String),
    UnknownScenario(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DataLoad(e) => write!(f, "{}", e),
            EngineError::Fetch(e) => write!(f, "Fetch failed: {}", e),
            EngineError::NoDataAvailable(city) => {
                write!(f, "No stations reporting for {}", city)
            }
            EngineError::UnknownScenario(name) => write!(f, "Unknown demo scenario: {}", name),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::DataLoad(e) => Some(e),
            EngineError::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataLoadError> for EngineError {
    fn from(err: DataLoadError) -> Self {
        EngineError::DataLoad(err)
    }
}

impl From<FetchError> for EngineError {
    fn from(err: FetchError) -> Self {
        EngineError::Fetch(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parses_table_spellings() {
        assert_eq!(Tier::parse("1"), Some(Tier::Regional));
        assert_eq!(Tier::parse("Tier 1"), Some(Tier::Regional));
        assert_eq!(Tier::parse(" tier 2 "), Some(Tier::Distant));
        assert_eq!(Tier::parse("Corridor"), Some(Tier::Corridor));
        assert_eq!(Tier::parse("Tier 3"), Some(Tier::Corridor));
        assert_eq!(Tier::parse("4"), None);
        assert_eq!(Tier::parse(""), None);
    }

    #[test]
    fn test_prediction_is_clamped_at_zero() {
        let model = Regression { slope: 0.5, intercept: -30.0, r: 0.7 };
        assert_eq!(model.predict(10.0), 0.0);
        assert_eq!(model.predict(100.0), 20.0);
    }

    #[test]
    fn test_prediction_never_negative_across_inputs() {
        let models = [
            Regression { slope: 1.0, intercept: -50.0, r: 0.9 },
            Regression { slope: -0.8, intercept: 5.0, r: -0.2 },
            Regression { slope: 0.0, intercept: -1.0, r: 0.0 },
        ];
        for model in models {
            for pm in [0.0, 0.1, 12.0, 55.5, 250.0, 1000.0] {
                assert!(model.predict(pm) >= 0.0, "{:?} at {} went negative", model, pm);
            }
        }
    }

    #[test]
    fn test_engine_error_display_wraps_source() {
        let err: EngineError = FetchError::HttpError(503).into();
        assert_eq!(err.to_string(), "Fetch failed: HTTP error: 503");
        let err: EngineError = DataLoadError::UnknownCity("Ottawa".into()).into();
        assert_eq!(err.to_string(), "Unknown city: Ottawa");
    }
}
