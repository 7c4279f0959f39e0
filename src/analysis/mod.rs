/// Prediction for the smoke early-warning service.
///
/// This module turns live station readings into per-station predictions
/// for the target city and aggregates them into a city-level value.
/// The regressions themselves are fitted offline; this service only
/// applies the coefficients from the regression tables.
///
/// Submodules:
/// - `prediction`: the prediction engine and R-weighted aggregation.

pub mod prediction;
