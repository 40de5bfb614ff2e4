//! Durable memory of runs that have been driven to completion.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A run the controller finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedRun {
    pub run_id: String,
    pub finalized_at: DateTime<Utc>,
    /// Fragments dispatched over the run's lifetime.
    pub dispatched_count: u64,
}

/// Storage for finalized run identifiers.
///
/// Consulted by run detection so a finished run is never selected again,
/// including after a restart.
pub trait FinalizedRunStore: Send + Sync {
    /// Whether `run_id` has been finalized.
    fn is_finalized(&self, run_id: &str) -> Result<bool, StoreError>;

    /// Record a finalized run. Returns `false` if it was already recorded;
    /// the existing record is kept.
    fn mark_finalized(&self, run: &FinalizedRun) -> Result<bool, StoreError>;

    /// All finalized runs, ordered by run id.
    fn list(&self) -> Result<Vec<FinalizedRun>, StoreError>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS finalized_runs (
        run_id TEXT PRIMARY KEY,
        finalized_at TEXT NOT NULL,
        dispatched_count INTEGER NOT NULL
    );
"#;

/// SQLite-backed finalized run store
pub struct SqliteFinalizedRunStore {
    conn: Mutex<Connection>,
}

impl SqliteFinalizedRunStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory store (useful for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl FinalizedRunStore for SqliteFinalizedRunStore {
    fn is_finalized(&self, run_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM finalized_runs WHERE run_id = ?",
                params![run_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_finalized(&self, run: &FinalizedRun) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO finalized_runs (run_id, finalized_at, dispatched_count) VALUES (?, ?, ?)",
            params![
                run.run_id,
                run.finalized_at.to_rfc3339(),
                run.dispatched_count as i64,
            ],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn list(&self) -> Result<Vec<FinalizedRun>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, finalized_at, dispatched_count FROM finalized_runs ORDER BY run_id",
        )?;

        let rows = stmt.query_map([], |row| {
            let finalized_at: String = row.get(1)?;
            let dispatched_count: i64 = row.get(2)?;
            Ok((row.get::<_, String>(0)?, finalized_at, dispatched_count))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, finalized_at, dispatched_count) = row?;
            let finalized_at = DateTime::parse_from_rfc3339(&finalized_at)
                .map_err(|e| StoreError::Database(format!("bad timestamp for run {}: {}", run_id, e)))?
                .with_timezone(&Utc);
            runs.push(FinalizedRun {
                run_id,
                finalized_at,
                dispatched_count: dispatched_count.max(0) as u64,
            });
        }
        Ok(runs)
    }
}

/// Process-lifetime store, for tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryFinalizedRunStore {
    runs: RwLock<BTreeMap<String, FinalizedRun>>,
}

impl MemoryFinalizedRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FinalizedRunStore for MemoryFinalizedRunStore {
    fn is_finalized(&self, run_id: &str) -> Result<bool, StoreError> {
        let runs = self.runs.read().map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(runs.contains_key(run_id))
    }

    fn mark_finalized(&self, run: &FinalizedRun) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().map_err(|e| StoreError::Lock(e.to_string()))?;
        if runs.contains_key(&run.run_id) {
            return Ok(false);
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(true)
    }

    fn list(&self) -> Result<Vec<FinalizedRun>, StoreError> {
        let runs = self.runs.read().map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(runs.values().cloned().collect())
    }
}
