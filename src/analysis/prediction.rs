//! Per-station regression predictions and the city-level aggregate.
//!
//! Each reporting station's regression maps its raw PM2.5 onto the target
//! city. The city-level prediction is the mean of those values weighted by
//! each station's correlation, `max(0, r)`: a negatively correlated
//! station carries no weight rather than flipping sign.

use std::collections::HashMap;

use crate::alert::lead_time::LeadTimeTable;
use crate::alert::thresholds::AlertLevel;
use crate::model::{EngineError, PredictionResult, Reading, Station};
use crate::stations::StationCatalog;

/// Applies the catalog's regressions to live readings.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    catalog: StationCatalog,
    lead_times: LeadTimeTable,
}

impl PredictionEngine {
    pub fn new(catalog: StationCatalog, lead_times: LeadTimeTable) -> Self {
        PredictionEngine { catalog, lead_times }
    }

    pub fn catalog(&self) -> &StationCatalog {
        &self.catalog
    }

    /// Re-reads the regression tables.
    pub fn reload_catalog(&mut self) {
        self.catalog.reload();
    }

    /// Predicts for every station of `city` that has a reading.
    ///
    /// Results are worst (highest predicted) first, ties broken by ascending
    /// station id. Stations without a reading are skipped; an empty result
    /// is not an error here.
    pub fn evaluate(
        &self,
        city: &str,
        readings: &HashMap<String, Reading>,
    ) -> Result<Vec<PredictionResult>, EngineError> {
        let stations = self.catalog.stations_for_city(city)?;
        let mut results: Vec<PredictionResult> = stations
            .iter()
            .filter_map(|st| readings.get(&st.station_id).map(|r| self.predict(st, r)))
            .collect();
        sort_worst_first(&mut results);
        Ok(results)
    }

    /// One station's prediction for its target city.
    pub fn predict(&self, station: &Station, reading: &Reading) -> PredictionResult {
        let predicted = station.regression.predict(reading.pm25);
        PredictionResult {
            station_id: station.station_id.clone(),
            station_name: station.name.clone(),
            target_city: station.target_city.clone(),
            tier: station.tier,
            distance_km: station.distance_km,
            bearing: station.bearing.clone(),
            r: station.regression.r,
            pm25: reading.pm25,
            predicted,
            level: AlertLevel::from_pm25(predicted),
            lead_time: self.lead_times.lookup(station.distance_km).to_string(),
            observed_at: reading.observed_at,
        }
    }
}

/// Highest predicted first, then ascending station id.
pub fn sort_worst_first(results: &mut [PredictionResult]) {
    results.sort_by(|a, b| {
        b.predicted
            .total_cmp(&a.predicted)
            .then_with(|| a.station_id.cmp(&b.station_id))
    });
}

/// R-weighted mean of the stations' predictions.
///
/// Weight is `max(0, r)`. If every weight is zero the plain mean is used.
/// Returns `None` when no station reported.
pub fn weighted_prediction(results: &[PredictionResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }

    let (weighted_sum, weight_total) = results.iter().fold((0.0, 0.0), |(sum, total), r| {
        let weight = r.r.max(0.0);
        (sum + weight * r.predicted, total + weight)
    });

    if weight_total > 0.0 {
        Some(weighted_sum / weight_total)
    } else {
        let sum: f64 = results.iter().map(|r| r.predicted).sum();
        Some(sum / results.len() as f64)
    }
}

/// The city-level prediction, or `NoDataAvailable` if nothing reported.
pub fn city_prediction(city: &str, results: &[PredictionResult]) -> Result<f64, EngineError> {
    weighted_prediction(results).ok_or_else(|| EngineError::NoDataAvailable(city.to_string()))
}
