/// Snapshot store for the latest evaluation per city.
///
/// The result cache writes every successful refresh here and reads the
/// saved rows back at startup, so a restarted process can serve the last
/// known result (with its true age) before its first fetch completes.
/// This is a single-row-per-city cache record, not a reading history.

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::model::CachedResult;

const SCHEMA_SQL: &str = include_str!("../sql/001_cached_results.sql");

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection or query failure.
    Database(String),
    /// A stored payload could not be (de)serialized.
    Payload(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::Payload(msg) => write!(f, "Payload error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<postgres::Error> for StoreError {
    fn from(err: postgres::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Payload(err.to_string())
    }
}

/// Persistence for the result cache.
pub trait SnapshotStore: Send + Sync {
    /// Replaces the saved result for `city`.
    fn save(&self, city: &str, result: &CachedResult) -> Result<(), StoreError>;

    /// Every saved `(city, result)` pair.
    fn load_all(&self) -> Result<Vec<(String, CachedResult)>, StoreError>;
}

/// `ews.cached_results` in PostgreSQL.
pub struct PgSnapshotStore {
    client: Mutex<Client>,
}

impl PgSnapshotStore {
    /// Connects and creates the schema if it does not exist yet.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let mut client = Client::connect(database_url, NoTls)?;
        client.batch_execute(SCHEMA_SQL)?;
        Ok(PgSnapshotStore {
            client: Mutex::new(client),
        })
    }
}

impl SnapshotStore for PgSnapshotStore {
    fn save(&self, city: &str, result: &CachedResult) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)?;
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        client.execute(
            "INSERT INTO ews.cached_results (city, payload, computed_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (city) DO UPDATE
             SET payload = EXCLUDED.payload, computed_at = EXCLUDED.computed_at",
            &[&city, &payload, &result.computed_at],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(String, CachedResult)>, StoreError> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = client.query(
            "SELECT city, payload, computed_at FROM ews.cached_results ORDER BY city",
            &[],
        )?;

        let mut saved = Vec::with_capacity(rows.len());
        for row in rows {
            let city: String = row.get(0);
            let payload: String = row.get(1);
            let computed_at: DateTime<Utc> = row.get(2);
            let mut result: CachedResult = serde_json::from_str(&payload)?;
            // The column is authoritative if the two ever disagree.
            result.computed_at = computed_at;
            saved.push((city, result));
        }
        Ok(saved)
    }
}
