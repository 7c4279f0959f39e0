//! Distance to lead-time policy table.
//!
//! Smoke is assumed to travel at a roughly constant transport speed, so
//! the warning window is a function of station distance alone. The bands
//! are data, not arithmetic: a table can be swapped in from configuration.

use serde::Deserialize;

/// One distance band. A station farther than `above_km` gets `label`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeadTimeBand {
    pub above_km: f64,
    pub label: String,
}

/// Ordered distance bands with a fallback label for the nearest stations.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadTimeTable {
    bands: Vec<LeadTimeBand>,
    nearest: String,
}

impl LeadTimeTable {
    /// Builds a table from bands in any order. Bands are matched from
    /// the farthest threshold down.
    pub fn new(mut bands: Vec<LeadTimeBand>, nearest: impl Into<String>) -> Self {
        bands.sort_by(|a, b| b.above_km.total_cmp(&a.above_km));
        LeadTimeTable {
            bands,
            nearest: nearest.into(),
        }
    }

    /// Estimated warning window for a station `distance_km` from the city.
    pub fn lookup(&self, distance_km: f64) -> &str {
        self.bands
            .iter()
            .find(|band| distance_km > band.above_km)
            .map(|band| band.label.as_str())
            .unwrap_or(&self.nearest)
    }

    pub fn bands(&self) -> &[LeadTimeBand] {
        &self.bands
    }
}

impl Default for LeadTimeTable {
    /// Bands observed for the Toronto smoke events: distant stations
    /// (1000+ km) lead by one to three days, corridor stations are often
    /// simultaneous with the city.
    fn default() -> Self {
        let band = |above_km: f64, label: &str| LeadTimeBand {
            above_km,
            label: label.to_string(),
        };
        LeadTimeTable::new(
            vec![
                band(1000.0, "24-72 hrs"),
                band(600.0, "18-48 hrs"),
                band(400.0, "12-36 hrs"),
                band(250.0, "8-24 hrs"),
                band(150.0, "4-18 hrs"),
            ],
            "2-12 hrs",
        )
    }
}
