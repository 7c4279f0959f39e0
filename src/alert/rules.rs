//! Three-rule smoke detection policy.
//!
//! - Rule 1 (regional): a tier-1 station predicts above the regional trigger.
//! - Rule 2 (distant + confirmation): a tier-2 station predicts above the
//!   distant trigger and, in the same cycle, an intermediate station between
//!   it and the city predicts above the confirmation threshold.
//! - Rule 3 (corridor): a corridor station predicts above the corridor trigger.
//!
//! Evaluation is stateless per refresh cycle. When several rules fire, the
//! reported one is Rule 1, else Rule 2, else Rule 3. All comparisons are
//! strictly greater than. A city whose weighted prediction is LOW stays
//! inactive even when a rule fires.

use serde::Deserialize;
use std::cmp::Ordering;

use crate::alert::thresholds::AlertLevel;
use crate::model::{AlertRule, CityAlertState, PredictionResult, Tier};

/// Trigger thresholds in µg/m³ and the intermediate distance band for Rule 2.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub rule1_regional: f64,
    pub rule2_distant: f64,
    pub rule2_intermediate: f64,
    pub intermediate_min_km: f64,
    pub intermediate_max_km: f64,
    pub rule3_corridor: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        RuleThresholds {
            rule1_regional: 40.0,
            rule2_distant: 35.0,
            rule2_intermediate: 20.0,
            intermediate_min_km: 200.0,
            intermediate_max_km: 600.0,
            rule3_corridor: 40.0,
        }
    }
}

/// A fired rule with the station(s) responsible.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule: AlertRule,
    /// Station ids. Rule 2 lists the distant station, then the confirming one.
    pub trigger_stations: Vec<String>,
    pub lead_time: String,
}

#[derive(Debug, Clone, Default)]
pub struct AlertRuleEvaluator {
    thresholds: RuleThresholds,
}

/// Orders by predicted value descending, then station id ascending.
fn worst_first(a: &PredictionResult, b: &PredictionResult) -> Ordering {
    b.predicted
        .total_cmp(&a.predicted)
        .then_with(|| a.station_id.cmp(&b.station_id))
}

fn worst<'a, I>(iter: I) -> Option<&'a PredictionResult>
where
    I: Iterator<Item = &'a PredictionResult>,
{
    iter.min_by(|a, b| worst_first(a, b))
}

impl AlertRuleEvaluator {
    pub fn new(thresholds: RuleThresholds) -> Self {
        AlertRuleEvaluator { thresholds }
    }

    /// Applies the three rules to one city's results. `None` is the
    /// normal no-alert state.
    pub fn evaluate(&self, results: &[PredictionResult]) -> Option<RuleOutcome> {
        self.rule1(results)
            .or_else(|| self.rule2(results))
            .or_else(|| self.rule3(results))
    }

    fn rule1(&self, results: &[PredictionResult]) -> Option<RuleOutcome> {
        let trigger = worst(results.iter().filter(|r| {
            r.tier == Tier::Regional && r.predicted > self.thresholds.rule1_regional
        }))?;
        Some(RuleOutcome {
            rule: AlertRule::Rule1,
            trigger_stations: vec![trigger.station_id.clone()],
            lead_time: trigger.lead_time.clone(),
        })
    }

    fn rule2(&self, results: &[PredictionResult]) -> Option<RuleOutcome> {
        let t = &self.thresholds;
        let mut distant: Vec<&PredictionResult> = results
            .iter()
            .filter(|r| r.tier == Tier::Distant && r.predicted > t.rule2_distant)
            .collect();
        distant.sort_by(|a, b| worst_first(a, b));

        distant.into_iter().find_map(|far| {
            let confirmation = worst(results.iter().filter(|r| {
                r.station_id != far.station_id
                    && r.distance_km >= t.intermediate_min_km
                    && r.distance_km <= t.intermediate_max_km
                    && r.distance_km < far.distance_km
                    && r.predicted > t.rule2_intermediate
            }))?;
            Some(RuleOutcome {
                rule: AlertRule::Rule2,
                trigger_stations: vec![far.station_id.clone(), confirmation.station_id.clone()],
                lead_time: far.lead_time.clone(),
            })
        })
    }

    fn rule3(&self, results: &[PredictionResult]) -> Option<RuleOutcome> {
        let trigger = worst(results.iter().filter(|r| {
            r.tier == Tier::Corridor && r.predicted > self.thresholds.rule3_corridor
        }))?;
        Some(RuleOutcome {
            rule: AlertRule::Rule3,
            trigger_stations: vec![trigger.station_id.clone()],
            lead_time: trigger.lead_time.clone(),
        })
    }

    /// Builds the city's alert state from its results and the city-level
    /// (R-weighted) prediction. A fired rule only raises the alert when
    /// the weighted prediction is above LOW.
    pub fn city_state(
        &self,
        city: &str,
        results: &[PredictionResult],
        weighted_pm25: f64,
    ) -> CityAlertState {
        let max_pm25 = results.iter().map(|r| r.predicted).fold(0.0, f64::max);
        let level = AlertLevel::from_pm25(weighted_pm25);
        let outcome = self.evaluate(results).filter(|_| level > AlertLevel::Low);

        CityAlertState {
            city: city.to_string(),
            active: outcome.is_some(),
            rule: outcome.as_ref().map(|o| o.rule),
            trigger_stations: outcome
                .as_ref()
                .map(|o| o.trigger_stations.clone())
                .unwrap_or_default(),
            lead_time: outcome.map(|o| o.lead_time),
            predicted_pm25: weighted_pm25,
            max_pm25,
            level,
        }
    }
}
