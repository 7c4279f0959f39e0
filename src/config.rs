/// Service configuration loader
///
/// Loads `ews.toml`: target cities and their regression tables, WAQI
/// access settings, cache TTL, excluded stations, and optional overrides
/// for the rule thresholds and lead-time bands. Secrets come from the
/// environment (`.env` via dotenv): `WAQI_API_TOKEN` and `DATABASE_URL`.

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::alert::lead_time::{LeadTimeBand, LeadTimeTable};
use crate::alert::rules::RuleThresholds;
use crate::ingest::waqi::WAQI_BASE_URL;

/// Default config path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "data/ews.toml";

/// Upper bound on `cache.ttl_minutes` (one week).
pub const MAX_TTL_MINUTES: i64 = 7 * 24 * 60;

pub const ENV_CONFIG_PATH: &str = "EWS_CONFIG";
pub const ENV_WAQI_TOKEN: &str = "WAQI_API_TOKEN";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

// ============================================================================
// TOML Configuration Structures
// ============================================================================

/// Root TOML structure
#[derive(Debug, Clone, Deserialize)]
pub struct EwsConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub waqi: WaqiConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub cities: Vec<CityConfig>,
    #[serde(default)]
    pub rules: RuleThresholds,
    #[serde(default)]
    pub lead_time_bands: Vec<LeadTimeBand>,
    /// Label for stations closer than every band.
    pub nearest_lead_time: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Set from `DATABASE_URL`; enables the snapshot store.
    #[serde(skip)]
    pub database_url: Option<String>,
    /// Directory the config was loaded from; table paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { ttl_minutes: 30 }
    }
}

/// WAQI API access settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaqiConfig {
    pub base_url: String,
    /// Overridden by `WAQI_API_TOKEN` when set.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Padding added around the station bounding box (~55 km at 0.5°).
    pub bbox_padding_deg: f64,
    /// A station only takes a monitor's value if it is this close.
    pub match_radius_km: f64,
    pub max_observation_age_minutes: u64,
}

impl Default for WaqiConfig {
    fn default() -> Self {
        WaqiConfig {
            base_url: WAQI_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            bbox_padding_deg: 0.5,
            match_radius_km: 30.0,
            max_observation_age_minutes: 180,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Stations too far from any target city to be useful.
    pub excluded_station_ids: Vec<String>,
}

/// A target city and the regression table predicting for it.
#[derive(Debug, Clone, Deserialize)]
pub struct CityConfig {
    pub key: String,
    pub label: String,
    /// City position, shown on map badges.
    pub lat: f64,
    pub lon: f64,
    pub table: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "debug", "info", "warn" or "error".
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            timestamps: true,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io { path: String, message: String },
    /// The file is not valid TOML or does not match the schema.
    Parse(String),
    /// The file parsed but is inconsistent.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => {
                write!(f, "Cannot read config {}: {}", path, message)
            }
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

impl EwsConfig {
    /// Parses config text. Relative table paths resolve against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: EwsConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cities.is_empty() {
            return Err(ConfigError::Invalid("no [[cities]] declared".to_string()));
        }
        let mut seen = HashSet::new();
        for city in &self.cities {
            if !seen.insert(city.key.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate city '{}'", city.key)));
            }
            if !(-90.0..=90.0).contains(&city.lat) || !(-180.0..=180.0).contains(&city.lon) {
                return Err(ConfigError::Invalid(format!(
                    "city '{}' has coordinates out of range",
                    city.key
                )));
            }
        }
        if self.cache.ttl_minutes <= 0 || self.cache.ttl_minutes > MAX_TTL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "cache.ttl_minutes must be between 1 and {}",
                MAX_TTL_MINUTES
            )));
        }
        Ok(())
    }

    /// Applies secrets from the environment. Empty values are ignored.
    pub fn apply_overrides(&mut self, waqi_token: Option<String>, database_url: Option<String>) {
        if let Some(token) = waqi_token.filter(|t| !t.trim().is_empty()) {
            self.waqi.api_key = Some(token);
        }
        if let Some(url) = database_url.filter(|u| !u.trim().is_empty()) {
            self.database_url = Some(url);
        }
    }

    /// Absolute (or working-directory relative) path to a city's table.
    pub fn table_path(&self, city: &CityConfig) -> PathBuf {
        if city.table.is_absolute() {
            city.table.clone()
        } else {
            self.base_dir.join(&city.table)
        }
    }

    /// The configured lead-time bands, or the default table if none are set.
    pub fn lead_time_table(&self) -> LeadTimeTable {
        if self.lead_time_bands.is_empty() {
            return LeadTimeTable::default();
        }
        LeadTimeTable::new(
            self.lead_time_bands.clone(),
            self.nearest_lead_time.clone().unwrap_or_else(|| "2-12 hrs".to_string()),
        )
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache.ttl_minutes)
    }
}

/// Loads config from `path` and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EwsConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut config = EwsConfig::from_toml_str(&content, base_dir)?;
    config.apply_overrides(
        std::env::var(ENV_WAQI_TOKEN).ok(),
        std::env::var(ENV_DATABASE_URL).ok(),
    );
    Ok(config)
}

/// Resolves the config path from `EWS_CONFIG`, falling back to the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ============================================================================
// Tests
// ============================================================================
