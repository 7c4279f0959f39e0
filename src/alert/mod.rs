/// Alerting: level classification, lead-time policy, and the three-rule
/// detection evaluator.
///
/// Submodules:
/// - `thresholds`: PM2.5 level bands with colours and health guidance.
/// - `lead_time`: distance-banded warning windows.
/// - `rules`: the per-city rule evaluator.

pub mod lead_time;
pub mod rules;
pub mod thresholds;
