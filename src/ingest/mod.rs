/// Live data ingestion.
///
/// - `waqi`: WAQI map-bounds client and the `ReadingSource` seam
/// - `staleness`: observation-time parsing and freshness checks

pub mod staleness;
pub mod waqi;
