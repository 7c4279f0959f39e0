/// Request-facing facade of the early-warning engine.
///
/// `EarlyWarningService` wires the station catalog, the live reading
/// source, the prediction engine, the alert rules and the result cache
/// together and exposes the operations an API layer needs: the station
/// list, live results, demo results, forced refreshes and catalog reload.
///
/// Evaluation is request-triggered. A live request consults the cache
/// first and only fetches when the city's entry is older than the TTL.
/// Each city is evaluated on its own; a failure for one city never hides
/// the results of another.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::alert::rules::AlertRuleEvaluator;
use crate::alert::thresholds::AlertLevel;
use crate::analysis::prediction::{PredictionEngine, city_prediction, sort_worst_first};
use crate::cache::{CachedView, ResultCache};
use crate::config::{CityConfig, EwsConfig};
use crate::demo;
use crate::ingest::waqi::{ReadingSource, WaqiFetcher};
use crate::logging::{self, DataSource};
use crate::model::{
    CachedResult, CityAlertState, DataLoadError, EngineError, PredictionResult, Reading, Station,
};
use crate::stations::StationCatalog;
use crate::store::PgSnapshotStore;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// How current one city's part of a view is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityStatus {
    pub city: String,
    pub computed_at: DateTime<Utc>,
    pub age_seconds: i64,
    pub fresh: bool,
    /// Zero stations reported during the evaluation.
    pub no_data: bool,
    pub stale_reason: Option<String>,
}

impl CityStatus {
    fn from_view(view: &CachedView) -> Self {
        CityStatus {
            city: view.city.clone(),
            computed_at: view.result.computed_at,
            age_seconds: view.age_seconds(),
            fresh: view.fresh,
            no_data: view.no_data(),
            stale_reason: view.stale_reason.clone(),
        }
    }
}

/// Display metadata for a city's current level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityBadge {
    pub city: String,
    pub label: String,
    /// Marker position; `None` for cities missing from the config.
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub level: AlertLevel,
    /// 1 (LOW) to 5 (EXTREME).
    pub rank: u8,
    pub name: &'static str,
    pub hex: &'static str,
    pub text_color: &'static str,
    pub health: &'static str,
}

impl CityBadge {
    fn new(state: &CityAlertState, city: Option<&CityConfig>) -> Self {
        let level = state.level;
        CityBadge {
            city: state.city.clone(),
            label: city.map_or_else(|| state.city.clone(), |c| c.label.clone()),
            lat: city.map(|c| c.lat),
            lon: city.map(|c| c.lon),
            level,
            rank: level.rank(),
            name: level.name(),
            hex: level.hex(),
            text_color: level.text_color(),
            health: level.health(),
        }
    }
}

/// Results for one or more cities, merged worst first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub results: Vec<PredictionResult>,
    pub city_alerts: BTreeMap<String, CityAlertState>,
    pub badges: Vec<CityBadge>,
    pub cities: Vec<CityStatus>,
    /// Cities that had no result at all, with the reason.
    pub errors: BTreeMap<String, String>,
}

impl LiveView {
    fn new() -> Self {
        LiveView {
            results: Vec::new(),
            city_alerts: BTreeMap::new(),
            badges: Vec::new(),
            cities: Vec::new(),
            errors: BTreeMap::new(),
        }
    }

    fn push(&mut self, view: CachedView) {
        self.cities.push(CityStatus::from_view(&view));
        self.results.extend(view.result.results);
        self.city_alerts.extend(view.result.city_alerts);
    }

    fn finish(mut self, cities: &BTreeMap<String, CityConfig>) -> Self {
        sort_worst_first(&mut self.results);
        self.badges = self
            .city_alerts
            .values()
            .map(|state| CityBadge::new(state, cities.get(&state.city)))
            .collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct EarlyWarningService {
    engine: RwLock<PredictionEngine>,
    evaluator: AlertRuleEvaluator,
    source: Box<dyn ReadingSource>,
    cache: ResultCache,
    /// Display name and position by city key.
    city_info: BTreeMap<String, CityConfig>,
}

impl EarlyWarningService {
    pub fn new(
        engine: PredictionEngine,
        evaluator: AlertRuleEvaluator,
        source: Box<dyn ReadingSource>,
        cache: ResultCache,
    ) -> Self {
        EarlyWarningService {
            engine: RwLock::new(engine),
            evaluator,
            source,
            cache,
            city_info: BTreeMap::new(),
        }
    }

    /// Sets the display name and position of each city for badges.
    /// Cities without an entry show their key and no position.
    pub fn with_city_info(mut self, cities: &[CityConfig]) -> Self {
        self.city_info = cities.iter().map(|c| (c.key.clone(), c.clone())).collect();
        self
    }

    /// Builds the production service: tables from the config, WAQI as the
    /// live source, and the PostgreSQL snapshot store when `DATABASE_URL`
    /// is set. An unreachable database only disables persistence.
    pub fn from_config(config: &EwsConfig) -> Result<Self, EngineError> {
        let catalog = StationCatalog::from_config(config);
        let engine = PredictionEngine::new(catalog, config.lead_time_table());
        let evaluator = AlertRuleEvaluator::new(config.rules.clone());
        let source = WaqiFetcher::new(config.waqi.clone())?;

        let cache = match config.database_url.as_deref() {
            Some(url) => match PgSnapshotStore::connect(url) {
                Ok(store) => ResultCache::with_store(config.cache_ttl(), Box::new(store)),
                Err(e) => {
                    logging::warn(
                        DataSource::Store,
                        None,
                        &format!("snapshot store unavailable, running without it: {}", e),
                    );
                    ResultCache::new(config.cache_ttl())
                }
            },
            None => ResultCache::new(config.cache_ttl()),
        };

        let service = EarlyWarningService::new(engine, evaluator, Box::new(source), cache);
        Ok(service.with_city_info(&config.cities))
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    fn engine(&self) -> std::sync::RwLockReadGuard<'_, PredictionEngine> {
        self.engine.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every loaded station, grouped by target city.
    pub fn get_stations(&self) -> BTreeMap<String, Vec<Station>> {
        self.engine().catalog().grouped().clone()
    }

    /// Declared cities, in configuration order.
    pub fn cities(&self) -> Vec<String> {
        self.engine().catalog().declared_cities()
    }

    /// Re-reads the regression tables. Returns the cities now loaded.
    pub fn reload_catalog(&self) -> Vec<String> {
        let mut engine = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        engine.reload_catalog();
        let available = engine.catalog().available_cities();
        logging::info(
            DataSource::Catalog,
            None,
            &format!(
                "catalog reloaded: {} of {} cities",
                available.len(),
                engine.catalog().declared_cities().len()
            ),
        );
        available
    }

    /// Live results for `city`, or for every declared city when `None`.
    /// Cached results younger than the TTL are served without a fetch.
    pub fn get_live(&self, city: Option<&str>) -> Result<LiveView, EngineError> {
        self.get_live_at(city, Utc::now())
    }

    pub fn get_live_at(
        &self,
        city: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LiveView, EngineError> {
        self.collect(city, "live", |c| {
            self.cache.get_or_refresh_at(c, now, || self.compute(c, now))
        })
    }

    /// Refreshes `city` (or every declared city) regardless of the TTL.
    pub fn refresh(&self, city: Option<&str>) -> Result<LiveView, EngineError> {
        self.refresh_at(city, Utc::now())
    }

    pub fn refresh_at(
        &self,
        city: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LiveView, EngineError> {
        self.collect(city, "refresh", |c| {
            self.cache.refresh_at(c, now, || self.compute(c, now))
        })
    }

    /// Results from a fixed synthetic reading set. `scenario` is a city
    /// key or `"all"`. Never fetches and never touches the cache.
    pub fn get_demo(&self, scenario: &str) -> Result<LiveView, EngineError> {
        self.get_demo_at(scenario, Utc::now())
    }

    pub fn get_demo_at(&self, scenario: &str, now: DateTime<Utc>) -> Result<LiveView, EngineError> {
        let cities = demo::cities_for(scenario)?;
        let mut view = LiveView::new();
        let mut first_error = None;

        for city in cities {
            let readings = demo::scenario(city)
                .map(|s| s.readings_at(now))
                .unwrap_or_default();
            match self.evaluate_readings(city, &readings, now) {
                Ok(result) => view.push(CachedView {
                    city: city.to_string(),
                    result,
                    age: chrono::Duration::zero(),
                    fresh: true,
                    stale_reason: None,
                }),
                Err(e) => {
                    logging::warn(DataSource::System, Some(city), &format!("demo skipped: {}", e));
                    view.errors.insert(city.to_string(), e.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if view.cities.is_empty() => Err(e),
            _ => Ok(view.finish(&self.city_info)),
        }
    }

    /// Runs `per_city` for the requested cities and merges the views.
    /// Fails only if no city produced a result.
    fn collect<F>(
        &self,
        city: Option<&str>,
        operation: &str,
        per_city: F,
    ) -> Result<LiveView, EngineError>
    where
        F: Fn(&str) -> Result<CachedView, EngineError>,
    {
        let declared = self.cities();
        let cities = match city {
            Some(c) if declared.iter().any(|d| d == c) => vec![c.to_string()],
            Some(c) => return Err(DataLoadError::UnknownCity(c.to_string()).into()),
            None => declared,
        };

        let mut view = LiveView::new();
        let mut first_error = None;
        for c in &cities {
            match per_city(c) {
                Ok(v) => view.push(v),
                Err(e) => {
                    logging::error(
                        DataSource::System,
                        Some(c),
                        &format!("{} failed: {}", operation, e),
                    );
                    view.errors.insert(c.clone(), e.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if cities.len() > 1 {
            logging::log_refresh_summary(cities.len(), view.cities.len(), view.errors.len());
        }

        match first_error {
            Some(e) if view.cities.is_empty() => Err(e),
            _ => Ok(view.finish(&self.city_info)),
        }
    }

    /// Fetch, predict and evaluate one city. The catalog lock is not held
    /// during the fetch.
    fn compute(&self, city: &str, now: DateTime<Utc>) -> Result<CachedResult, EngineError> {
        let stations = self.engine().catalog().stations_for_city(city)?.to_vec();
        let readings = self.source.fetch_latest(&stations).map_err(|e| {
            logging::log_fetch_failure(city, "fetch_latest", &e);
            e
        })?;
        self.evaluate_readings(city, &readings, now)
    }

    /// Predictions and alert state for one city. Zero reporting stations
    /// is a valid outcome and yields an empty result.
    fn evaluate_readings(
        &self,
        city: &str,
        readings: &HashMap<String, Reading>,
        now: DateTime<Utc>,
    ) -> Result<CachedResult, EngineError> {
        let results = self.engine().evaluate(city, readings)?;

        let weighted = match city_prediction(city, &results) {
            Ok(value) => value,
            Err(EngineError::NoDataAvailable(_)) => {
                logging::warn(DataSource::System, Some(city), "no stations reporting");
                return Ok(CachedResult::empty(now));
            }
            Err(e) => return Err(e),
        };

        let state = self.evaluator.city_state(city, &results, weighted);
        if let Some(rule) = state.rule {
            logging::info(
                DataSource::System,
                Some(city),
                &format!(
                    "{} alert via {} ({:.1} µg/m³ predicted, lead time {})",
                    state.level,
                    rule,
                    state.max_pm25,
                    state.lead_time.as_deref().unwrap_or("-")
                ),
            );
        }

        let mut city_alerts = BTreeMap::new();
        city_alerts.insert(city.to_string(), state);
        Ok(CachedResult {
            results,
            city_alerts,
            computed_at: now,
        })
    }
}
