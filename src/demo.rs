/// Fixed synthetic readings for demonstrations.
///
/// Replaces the live source with a static smoke episode per city so the
/// whole pipeline (prediction, rules, lead times) can be shown without a
/// WAQI token. Readings carry the evaluation time as their observation
/// time; stations in a scenario that are not in the city's catalog are
/// simply ignored by the engine.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{EngineError, Reading};

/// Scenario name that selects every demo city.
pub const ALL_SCENARIO: &str = "all";

pub struct DemoScenario {
    pub city: &'static str,
    /// `(station_id, pm25)` in µg/m³.
    pub readings: &'static [(&'static str, f64)],
}

pub static DEMO_SCENARIOS: &[DemoScenario] = &[
    DemoScenario {
        city: "Toronto",
        readings: &[
            ("60106", 85.0),
            ("66201", 78.0),
            ("65701", 72.0),
            ("61201", 90.0),
            ("60302", 65.0),
            ("65401", 55.0),
            ("60609", 30.0),
            ("360291007", 20.0),
            ("61502", 18.0),
        ],
    },
    DemoScenario {
        city: "Montreal",
        readings: &[
            ("54801", 80.0),
            ("52001", 75.0),
            ("50801", 68.0),
            ("500070012", 55.0),
            ("500070014", 50.0),
            ("500070007", 45.0),
            ("60106", 70.0),
            ("60302", 40.0),
        ],
    },
    DemoScenario {
        city: "Edmonton",
        readings: &[
            ("92801", 90.0),
            ("90302", 75.0),
            ("94401", 65.0),
            ("90304", 70.0),
            ("91901", 55.0),
            ("92901", 80.0),
        ],
    },
    DemoScenario {
        city: "Vancouver",
        readings: &[
            ("100316", 60.0),
            ("100313", 55.0),
            ("102301", 85.0),
            ("102302", 80.0),
            ("100304", 50.0),
            ("100308", 45.0),
        ],
    },
];

pub fn scenario(city: &str) -> Option<&'static DemoScenario> {
    DEMO_SCENARIOS.iter().find(|s| s.city == city)
}

pub fn scenario_names() -> Vec<&'static str> {
    DEMO_SCENARIOS.iter().map(|s| s.city).collect()
}

/// Resolves a scenario name to the cities it covers.
pub fn cities_for(name: &str) -> Result<Vec<&'static str>, EngineError> {
    if name.eq_ignore_ascii_case(ALL_SCENARIO) {
        return Ok(scenario_names());
    }
    scenario(name)
        .map(|s| vec![s.city])
        .ok_or_else(|| EngineError::UnknownScenario(name.to_string()))
}

impl DemoScenario {
    /// The scenario's readings, keyed by station id, observed at `now`.
    pub fn readings_at(&self, now: DateTime<Utc>) -> HashMap<String, Reading> {
        self.readings
            .iter()
            .map(|(id, pm25)| {
                (
                    id.to_string(),
                    Reading {
                        station_id: id.to_string(),
                        pm25: *pm25,
                        observed_at: now,
                    },
                )
            })
            .collect()
    }
}
