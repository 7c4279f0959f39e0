/// Wildfire-smoke PM2.5 early-warning engine.
///
/// Distant monitoring stations act as sentinels for a target city: each
/// station's regression maps its live PM2.5 onto the city, three
/// detection rules decide whether an alert is active, and the latest
/// result per city is cached with a TTL.

pub mod alert;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod demo;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod service;
pub mod stations;
pub mod store;
