/// Station catalog for the smoke early-warning service.
///
/// Loads one regression table per target city and indexes the stations
/// by city. Each row carries a station's location, its distance and
/// bearing from the city, its tier, and the regression (slope, intercept,
/// R) that maps the station's PM2.5 onto the city's.
///
/// The catalog is an owned value built at startup and handed to the
/// prediction engine. Tables are read once; `reload` is the only way to
/// pick up edited tables without restarting the process.
///
/// A missing or malformed table only takes its own city offline. Rows
/// with missing or non-finite coefficients or coordinates are excluded
/// with a warning.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EwsConfig;
use crate::logging::{self, DataSource};
use crate::model::{DataLoadError, Regression, Station, Tier};

// ---------------------------------------------------------------------------
// Regression table format
// ---------------------------------------------------------------------------

/// Root of a per-city regression table file.
#[derive(Debug, Deserialize)]
pub struct RegressionTable {
    pub stations: Vec<RegressionRow>,
}

/// A table cell that may have been exported as text or as a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn as_text(&self) -> String {
        match self {
            Cell::Integer(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.trim().to_string(),
        }
    }
}

/// One row: `station_id, city_name, lat, lon, distance_km, bearing, tier,
/// slope, intercept, r`. Everything is optional at parse time so a bad
/// row can be excluded on its own.
#[derive(Debug, Deserialize)]
pub struct RegressionRow {
    pub station_id: Option<Cell>,
    pub city_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub distance_km: Option<f64>,
    pub bearing: Option<String>,
    pub tier: Option<Cell>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub r: Option<f64>,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl RegressionRow {
    /// Converts a row into a station, or explains why it is excluded.
    fn into_station(self, target_city: &str) -> Result<Station, String> {
        let station_id = self
            .station_id
            .map(|c| c.as_text())
            .filter(|s| !s.is_empty())
            .ok_or("missing station_id")?;

        let tier_raw = self.tier.map(|c| c.as_text()).unwrap_or_default();
        let tier = Tier::parse(&tier_raw).ok_or_else(|| format!("unknown tier '{}'", tier_raw))?;

        let (Some(slope), Some(intercept), Some(r)) =
            (finite(self.slope), finite(self.intercept), finite(self.r))
        else {
            return Err("missing or non-finite regression coefficients".to_string());
        };
        let (Some(latitude), Some(longitude)) = (finite(self.lat), finite(self.lon)) else {
            return Err("missing coordinates".to_string());
        };
        let distance_km = finite(self.distance_km).ok_or("missing distance_km")?;

        Ok(Station {
            name: self.city_name.unwrap_or_else(|| station_id.clone()),
            station_id,
            latitude,
            longitude,
            distance_km,
            bearing: self.bearing.unwrap_or_default(),
            tier,
            regression: Regression { slope, intercept, r },
            target_city: target_city.to_string(),
        })
    }
}

/// Ascending distance, tie-break on station id.
pub fn sort_stations(stations: &mut [Station]) {
    stations.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.station_id.cmp(&b.station_id))
    });
}

/// Parses a regression table's text for `city`.
///
/// Excluded station ids are dropped. Bad rows are skipped with a warning;
/// duplicate station ids make the whole table malformed.
pub fn parse_table(
    content: &str,
    city: &str,
    excluded: &HashSet<String>,
) -> Result<Vec<Station>, DataLoadError> {
    let table: RegressionTable = toml::from_str(content).map_err(|e| DataLoadError::Malformed {
        city: city.to_string(),
        reason: e.to_string(),
    })?;

    let mut seen = HashSet::new();
    let mut stations = Vec::with_capacity(table.stations.len());
    for (i, row) in table.stations.into_iter().enumerate() {
        let station = match row.into_station(city) {
            Ok(st) => st,
            Err(reason) => {
                logging::warn(
                    DataSource::Catalog,
                    Some(city),
                    &format!("row {} excluded: {}", i + 1, reason),
                );
                continue;
            }
        };
        if excluded.contains(&station.station_id) {
            continue;
        }
        if !seen.insert(station.station_id.clone()) {
            return Err(DataLoadError::Malformed {
                city: city.to_string(),
                reason: format!("duplicate station_id '{}'", station.station_id),
            });
        }
        stations.push(station);
    }

    sort_stations(&mut stations);
    Ok(stations)
}

/// Reads and parses a regression table file.
pub fn load_table(
    path: &Path,
    city: &str,
    excluded: &HashSet<String>,
) -> Result<Vec<Station>, DataLoadError> {
    let content = fs::read_to_string(path).map_err(|_| DataLoadError::TableMissing {
        city: city.to_string(),
        path: path.display().to_string(),
    })?;
    parse_table(&content, city, excluded)
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Where a city's table lives.
#[derive(Debug, Clone, PartialEq)]
pub struct CitySource {
    pub city: String,
    pub path: PathBuf,
}

/// Stations grouped by target city, plus per-city load failures.
#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    sources: Vec<CitySource>,
    excluded: HashSet<String>,
    by_city: BTreeMap<String, Vec<Station>>,
    errors: BTreeMap<String, DataLoadError>,
}

impl StationCatalog {
    /// Loads every declared city's table. Never fails as a whole: cities
    /// whose tables cannot be loaded are recorded in `load_errors`.
    pub fn load<I>(sources: Vec<CitySource>, excluded: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut catalog = StationCatalog {
            sources,
            excluded: excluded.into_iter().collect(),
            by_city: BTreeMap::new(),
            errors: BTreeMap::new(),
        };
        catalog.reload();
        catalog
    }

    pub fn from_config(config: &EwsConfig) -> Self {
        let sources = config
            .cities
            .iter()
            .map(|c| CitySource {
                city: c.key.clone(),
                path: config.table_path(c),
            })
            .collect();
        StationCatalog::load(sources, config.catalog.excluded_station_ids.iter().cloned())
    }

    /// Builds a catalog from stations already in memory, grouped by
    /// `target_city`.
    pub fn from_stations(stations: Vec<Station>) -> Self {
        let mut by_city: BTreeMap<String, Vec<Station>> = BTreeMap::new();
        for st in stations {
            by_city.entry(st.target_city.clone()).or_default().push(st);
        }
        for list in by_city.values_mut() {
            sort_stations(list);
        }
        StationCatalog {
            sources: Vec::new(),
            excluded: HashSet::new(),
            by_city,
            errors: BTreeMap::new(),
        }
    }

    /// Re-reads every table from its source. Cities built in memory with
    /// `from_stations` have no source and are kept as they are.
    pub fn reload(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        let mut by_city = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for source in &self.sources {
            match load_table(&source.path, &source.city, &self.excluded) {
                Ok(stations) => {
                    logging::info(
                        DataSource::Catalog,
                        Some(&source.city),
                        &format!("{} stations loaded", stations.len()),
                    );
                    by_city.insert(source.city.clone(), stations);
                }
                Err(e) => {
                    logging::error(DataSource::Catalog, Some(&source.city), &e.to_string());
                    errors.insert(source.city.clone(), e);
                }
            }
        }

        self.by_city = by_city;
        self.errors = errors;
    }

    /// Stations for `city`, ascending by distance then station id.
    pub fn stations_for_city(&self, city: &str) -> Result<&[Station], DataLoadError> {
        if let Some(stations) = self.by_city.get(city) {
            return Ok(stations);
        }
        Err(self
            .errors
            .get(city)
            .cloned()
            .unwrap_or_else(|| DataLoadError::UnknownCity(city.to_string())))
    }

    /// Every loaded station, grouped by city.
    pub fn grouped(&self) -> &BTreeMap<String, Vec<Station>> {
        &self.by_city
    }

    pub fn all_stations(&self) -> impl Iterator<Item = &Station> {
        self.by_city.values().flatten()
    }

    /// Cities with a loaded table.
    pub fn available_cities(&self) -> Vec<String> {
        self.by_city.keys().cloned().collect()
    }

    /// Declared cities, loaded or not, in declaration order.
    pub fn declared_cities(&self) -> Vec<String> {
        if self.sources.is_empty() {
            return self.available_cities();
        }
        self.sources.iter().map(|s| s.city.clone()).collect()
    }

    pub fn load_errors(&self) -> &BTreeMap<String, DataLoadError> {
        &self.errors
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
