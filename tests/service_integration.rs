//! Early-warning service integration tests
//!
//! Drive `EarlyWarningService` end to end (regression tables on disk,
//! an in-memory reading source, prediction, rules, cache) without any
//! network access. Fixture tables are written to self-cleaning temp dirs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::TempDir;

use smoke_ews_service::alert::rules::AlertRuleEvaluator;
use smoke_ews_service::alert::thresholds::AlertLevel;
use smoke_ews_service::analysis::prediction::PredictionEngine;
use smoke_ews_service::cache::ResultCache;
use smoke_ews_service::config::EwsConfig;
use smoke_ews_service::ingest::waqi::ReadingSource;
use smoke_ews_service::model::{
    AlertRule, DataLoadError, EngineError, FetchError, Reading, Station,
};
use smoke_ews_service::service::EarlyWarningService;
use smoke_ews_service::stations::StationCatalog;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap()
}

const TORONTO_ONE_STATION: &str = r#"
[[stations]]
station_id = "60106"
city_name = "Sudbury"
lat = 46.4917
lon = -80.9930
distance_km = 333.6
bearing = "NW"
tier = "1"
slope = 1.0
intercept = 0.0
r = 0.9
"#;

/// Counts calls and serves whatever readings it was given.
#[derive(Default)]
struct CountingSource {
    readings: Mutex<HashMap<String, f64>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: u64,
}

impl CountingSource {
    fn set(&self, station_id: &str, pm25: f64) {
        self.readings.lock().unwrap().insert(station_id.to_string(), pm25);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct Shared(Arc<CountingSource>);

impl ReadingSource for Shared {
    fn fetch_latest(&self, stations: &[Station]) -> Result<HashMap<String, Reading>, FetchError> {
        let source = &self.0;
        source.calls.fetch_add(1, Ordering::SeqCst);
        if source.delay_ms > 0 {
            thread::sleep(std::time::Duration::from_millis(source.delay_ms));
        }
        if source.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Timeout);
        }
        let readings = source.readings.lock().unwrap();
        Ok(stations
            .iter()
            .filter_map(|st| {
                readings.get(&st.station_id).map(|pm25| {
                    (
                        st.station_id.clone(),
                        Reading {
                            station_id: st.station_id.clone(),
                            pm25: *pm25,
                            observed_at: t0(),
                        },
                    )
                })
            })
            .collect())
    }
}

/// Writes a config plus tables into a fresh temp dir. `tables` maps a
/// city key to its table text; `None` declares the city without a file.
/// The directory is removed when the returned guard drops.
fn fixture_config(tables: &[(&str, Option<&str>)]) -> (EwsConfig, TempDir) {
    let dir = TempDir::new().expect("create fixture dir");

    let mut text = String::new();
    for (city, table) in tables {
        let file = format!("{}.toml", city);
        if let Some(content) = table {
            fs::write(dir.path().join(&file), content).expect("write table");
        }
        text.push_str(&format!(
            "[[cities]]\nkey = \"{c}\"\nlabel = \"{c}\"\nlat = 45.0\nlon = -75.0\ntable = \"{f}\"\n\n",
            c = city,
            f = file
        ));
    }
    let config = EwsConfig::from_toml_str(&text, dir.path()).expect("valid fixture config");
    (config, dir)
}

fn service_with(config: &EwsConfig, source: Arc<CountingSource>) -> EarlyWarningService {
    let engine = PredictionEngine::new(StationCatalog::from_config(config), config.lead_time_table());
    EarlyWarningService::new(
        engine,
        AlertRuleEvaluator::new(config.rules.clone()),
        Box::new(Shared(source)),
        ResultCache::new(config.cache_ttl()),
    )
}

// ---------------------------------------------------------------------------
// Prediction and rules through the service
// ---------------------------------------------------------------------------

#[test]
fn test_toronto_single_regional_station_fires_rule1() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 45.0);
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_live_at(Some("Toronto"), t0()).expect("live view");

    assert_eq!(view.results.len(), 1);
    let result = &view.results[0];
    assert_eq!(result.predicted, 45.0);
    assert_eq!(result.level, AlertLevel::Moderate);

    let alert = &view.city_alerts["Toronto"];
    assert!(alert.active);
    assert_eq!(alert.rule, Some(AlertRule::Rule1));
    assert_eq!(alert.trigger_stations, vec!["60106"]);
    assert!(alert.lead_time.as_deref().is_some_and(|l| !l.is_empty()));
    assert_eq!(alert.predicted_pm25, 45.0);
    assert_eq!(alert.level, AlertLevel::Moderate);
}

#[test]
fn test_reading_at_threshold_does_not_alert() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 40.0);
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_live_at(Some("Toronto"), t0()).expect("live view");
    let alert = &view.city_alerts["Toronto"];
    assert!(!alert.active);
    assert_eq!(alert.rule, None);
    assert!(alert.trigger_stations.is_empty());
}

const TORONTO_WEAK_REGIONAL: &str = r#"
[[stations]]
station_id = "60106"
city_name = "Sudbury"
lat = 46.4917
lon = -80.9930
distance_km = 333.6
bearing = "NW"
tier = "1"
slope = 1.0
intercept = 0.0
r = 0.1

[[stations]]
station_id = "65401"
city_name = "Parry Sound"
lat = 45.3386
lon = -80.0356
distance_km = 186.9
bearing = "N"
tier = "1"
slope = 1.0
intercept = 0.0
r = 0.9
"#;

#[test]
fn test_rule_firing_at_low_city_level_is_not_an_alert() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_WEAK_REGIONAL))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 41.0);
    source.set("65401", 5.0);
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_live_at(Some("Toronto"), t0()).expect("live view");
    let alert = &view.city_alerts["Toronto"];
    // (41.0 * 0.1 + 5.0 * 0.9) / 1.0
    assert!((alert.predicted_pm25 - 8.6).abs() < 1e-9);
    assert_eq!(alert.level, AlertLevel::Low);
    assert!(!alert.active);
    assert_eq!(alert.rule, None);
    assert!(alert.trigger_stations.is_empty());
    assert_eq!(alert.lead_time, None);
}

#[test]
fn test_zero_reporting_stations_caches_empty_result() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_live_at(Some("Toronto"), t0()).expect("no data is not an error");
    assert!(view.results.is_empty());
    assert!(view.city_alerts.is_empty());
    assert_eq!(view.cities.len(), 1);
    assert!(view.cities[0].no_data);

    let cached = service.cache().peek("Toronto").expect("empty result is cached");
    assert!(cached.is_empty());
    assert_eq!(cached.computed_at, t0());
}

// ---------------------------------------------------------------------------
// Cache behaviour
// ---------------------------------------------------------------------------

#[test]
fn test_cache_ttl_limits_fetches() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 45.0);
    let service = service_with(&config, Arc::clone(&source));

    let first = service.get_live_at(Some("Toronto"), t0()).expect("first");
    let second = service
        .get_live_at(Some("Toronto"), t0() + Duration::minutes(10))
        .expect("second");
    assert_eq!(source.calls(), 1);
    assert_eq!(first.cities[0].computed_at, second.cities[0].computed_at);
    assert_eq!(second.cities[0].age_seconds, 600);

    let later = t0() + Duration::minutes(31);
    let third = service.get_live_at(Some("Toronto"), later).expect("third");
    assert_eq!(source.calls(), 2);
    assert_eq!(third.cities[0].computed_at, later);
}

#[test]
fn test_forced_refresh_bypasses_ttl() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 45.0);
    let service = service_with(&config, Arc::clone(&source));

    service.get_live_at(Some("Toronto"), t0()).expect("first");
    source.set("60106", 70.0);
    let view = service
        .refresh_at(Some("Toronto"), t0() + Duration::minutes(1))
        .expect("refresh");

    assert_eq!(source.calls(), 2);
    assert_eq!(view.results[0].predicted, 70.0);
    assert_eq!(view.city_alerts["Toronto"].level, AlertLevel::High);
}

#[test]
fn test_fetch_failure_serves_previous_result_with_age() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 45.0);
    let service = service_with(&config, Arc::clone(&source));

    service.get_live_at(Some("Toronto"), t0()).expect("first");
    source.failing.store(true, Ordering::SeqCst);

    let view = service
        .get_live_at(Some("Toronto"), t0() + Duration::minutes(40))
        .expect("falls back to cached result");
    let status = &view.cities[0];
    assert!(!status.fresh);
    assert_eq!(status.age_seconds, 40 * 60);
    assert_eq!(status.computed_at, t0());
    assert!(status.stale_reason.as_deref().is_some_and(|r| r.contains("timeout")));
    assert_eq!(view.results[0].predicted, 45.0);
}

#[test]
fn test_fetch_failure_without_cache_is_an_error() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    source.failing.store(true, Ordering::SeqCst);
    let service = service_with(&config, Arc::clone(&source));

    let err = service.get_live_at(Some("Toronto"), t0()).unwrap_err();
    assert_eq!(err, EngineError::Fetch(FetchError::Timeout));
}

#[test]
fn test_concurrent_requests_make_one_fetch() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource {
        delay_ms: 50,
        ..CountingSource::default()
    });
    source.set("60106", 45.0);
    let service = Arc::new(service_with(&config, Arc::clone(&source)));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.get_live_at(Some("Toronto"), t0()).expect("shared view")
            })
        })
        .collect();

    for handle in handles {
        let view = handle.join().unwrap();
        assert_eq!(view.cities[0].computed_at, t0());
    }
    assert_eq!(source.calls(), 1);
}

// ---------------------------------------------------------------------------
// Catalog handling
// ---------------------------------------------------------------------------

#[test]
fn test_missing_table_only_affects_its_city() {
    let (config, _dir) =
        fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION)), ("Montreal", None)]);
    let source = Arc::new(CountingSource::default());
    source.set("60106", 45.0);
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_live_at(None, t0()).expect("Toronto still served");
    assert_eq!(view.cities.len(), 1);
    assert_eq!(view.cities[0].city, "Toronto");
    assert!(view.errors.contains_key("Montreal"));
    assert_eq!(source.calls(), 1, "no fetch for a city without a table");

    let err = service.get_live_at(Some("Montreal"), t0()).unwrap_err();
    assert!(matches!(err, EngineError::DataLoad(DataLoadError::TableMissing { .. })));
}

#[test]
fn test_unknown_city_is_rejected() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let service = service_with(&config, Arc::new(CountingSource::default()));

    let err = service.get_live_at(Some("Halifax"), t0()).unwrap_err();
    assert_eq!(err, EngineError::DataLoad(DataLoadError::UnknownCity("Halifax".into())));
}

#[test]
fn test_undeclared_cities_never_reach_the_cache() {
    let (config, _dir) = fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION))]);
    let source = Arc::new(CountingSource::default());
    let service = service_with(&config, Arc::clone(&source));

    for i in 0..100 {
        let city = format!("bogus{}", i);
        assert!(service.get_live_at(Some(&city), t0()).is_err());
        assert!(service.refresh_at(Some(&city), t0()).is_err());
    }
    assert_eq!(service.cache().tracked_slots(), 0);
    assert!(service.cache().cities().is_empty());
    assert_eq!(source.calls(), 0);
}

#[test]
fn test_reload_catalog_picks_up_new_table() {
    let (config, dir) =
        fixture_config(&[("Toronto", Some(TORONTO_ONE_STATION)), ("Montreal", None)]);
    let service = service_with(&config, Arc::new(CountingSource::default()));
    assert_eq!(service.get_stations().len(), 1);

    let montreal = TORONTO_ONE_STATION.replace("333.6", "576.5");
    fs::write(dir.path().join("Montreal.toml"), montreal).expect("write table");
    assert_eq!(service.reload_catalog(), vec!["Montreal", "Toronto"]);
    assert_eq!(service.get_stations()["Montreal"][0].distance_km, 576.5);
}

// ---------------------------------------------------------------------------
// Shipped configuration and demo scenarios
// ---------------------------------------------------------------------------

fn shipped_config() -> EwsConfig {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data");
    let text = fs::read_to_string(root.join("ews.toml")).expect("data/ews.toml");
    EwsConfig::from_toml_str(&text, root).expect("shipped config is valid")
}

#[test]
fn test_shipped_tables_load_for_every_city() {
    let config = shipped_config();
    let service = service_with(&config, Arc::new(CountingSource::default()));
    let stations = service.get_stations();

    assert_eq!(stations.len(), 4);
    for city in ["Toronto", "Montreal", "Edmonton", "Vancouver"] {
        assert!(!stations[city].is_empty(), "{} has no stations", city);
    }
    assert!(
        !stations["Montreal"].iter().any(|s| s.station_id == "50308"),
        "excluded station is dropped"
    );
}

#[test]
fn test_demo_all_alerts_every_city_without_fetching() {
    let config = shipped_config();
    let source = Arc::new(CountingSource::default());
    let service = service_with(&config, Arc::clone(&source));

    let view = service.get_demo_at("all", t0()).expect("demo view");
    assert_eq!(source.calls(), 0);
    assert_eq!(view.city_alerts.len(), 4);
    assert!(view.city_alerts.values().all(|a| a.active));

    let toronto = &view.city_alerts["Toronto"];
    assert_eq!(toronto.rule, Some(AlertRule::Rule1));
    assert_eq!(toronto.trigger_stations, vec!["60106"]);
    assert_eq!(toronto.lead_time.as_deref(), Some("8-24 hrs"));

    assert!(
        view.results
            .windows(2)
            .all(|w| w[0].predicted >= w[1].predicted),
        "merged results are worst first"
    );
    assert!(service.cache().peek("Toronto").is_none(), "demo never touches the cache");
}

#[test]
fn test_badges_carry_labels_and_level_metadata() {
    let config = shipped_config();
    let service = service_with(&config, Arc::new(CountingSource::default()))
        .with_city_info(&config.cities);

    let view = service.get_demo_at("Montreal", t0()).expect("demo view");
    assert_eq!(view.badges.len(), 1);
    let badge = &view.badges[0];
    assert_eq!(badge.city, "Montreal");
    assert_eq!(badge.label, "Montréal");
    assert_eq!(badge.level, view.city_alerts["Montreal"].level);
    assert_eq!(badge.rank, badge.level.rank());
    assert!(badge.hex.starts_with('#'));
    assert_eq!(badge.lat, Some(45.5027));
    assert_eq!(badge.lon, Some(-73.6639));
}

#[test]
fn test_badges_without_city_info_fall_back_to_key() {
    let config = shipped_config();
    let service = service_with(&config, Arc::new(CountingSource::default()));

    let view = service.get_demo_at("Montreal", t0()).expect("demo view");
    let badge = &view.badges[0];
    assert_eq!(badge.label, "Montreal");
    assert_eq!(badge.lat, None);
}

#[test]
fn test_unknown_demo_scenario() {
    let config = shipped_config();
    let service = service_with(&config, Arc::new(CountingSource::default()));
    assert_eq!(
        service.get_demo_at("Halifax", t0()).unwrap_err(),
        EngineError::UnknownScenario("Halifax".into())
    );
}

// ---------------------------------------------------------------------------
// Live API (requires network and WAQI_API_TOKEN)
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_live_waqi_toronto() {
    dotenv::dotenv().ok();
    let mut config = shipped_config();
    config.apply_overrides(std::env::var("WAQI_API_TOKEN").ok(), None);
    assert!(config.waqi.api_key.is_some(), "WAQI_API_TOKEN must be set");

    let service = EarlyWarningService::from_config(&config).expect("service");
    let view = service.get_live(Some("Toronto")).expect("live Toronto");

    println!("\nToronto: {} stations reporting", view.results.len());
    for r in &view.results {
        println!(
            "  {:<10} {:<20} {:>6.1} -> {:>6.1} {}",
            r.station_id, r.station_name, r.pm25, r.predicted, r.level
        );
    }
    assert_eq!(view.cities.len(), 1);
    assert!(view.results.iter().all(|r| r.predicted >= 0.0));
}
