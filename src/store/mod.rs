//! SQLite persistence for reports, tasks and quota.
//!
//! This module is split into submodules:
//! - `reports`: report cache rows, the atomic build claim, invalidation
//! - `tasks`: submissions and task state transitions
//! - `quota`: per-user daily analysis quota
//! - `stats`: counting for the admin surface
//!
//! All access is connection-per-call over one SQLite file in WAL mode.
//! Methods are synchronous; async callers go through [`Store::run`],
//! which dispatches to `spawn_blocking` behind a semaphore so database
//! work cannot flood tokio's blocking pool.

mod quota;
mod reports;
mod stats;
mod tasks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Semaphore;

pub use reports::{BuildClaim, CacheDecision, GcOutcome};
pub use stats::StoreStats;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored report is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Concurrent `Store::run` calls allowed by default. SQLite serialises
/// writers anyway, so queueing here beats parking blocking threads.
const DEFAULT_BLOCKING_LIMIT: usize = 8;

/// SQLite-backed store for the analysis pipeline.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    gate: Arc<Semaphore>,
}

impl Store {
    /// Open (or create) the store at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            gate: Arc::new(Semaphore::new(DEFAULT_BLOCKING_LIMIT)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Resize the blocking gate. Call before handing out clones; clones
    /// made afterwards share the new gate.
    pub fn with_blocking_limit(mut self, limit: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Run a store closure on the blocking pool. All async access goes
    /// through here so the gate sees every caller.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> Result<T> + Send + 'static,
    {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Task("blocking gate closed".to_string()))?;
        let store = self.clone();
        match tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(store)
        })
        .await
        {
            Ok(result) => result,
            Err(err) => Err(StoreError::Task(err.to_string())),
        }
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        Ok(open_db(&self.db_path)?)
    }

    /// Get the database path.
    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- What users asked for, verbatim
            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                subject TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- One row per accepted submission
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                submission_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'queued',
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                error_kind TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_fingerprint ON tasks(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);

            -- Report cache. One live row per fingerprint; superseded
            -- rows are retained for audit.
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                claim_token TEXT,
                claimed_at TEXT,
                report TEXT,
                error_kind TEXT,
                produced_at TEXT,
                expires_at TEXT,
                superseded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_live
                ON reports(fingerprint) WHERE superseded = 0;
            CREATE INDEX IF NOT EXISTS idx_reports_kind ON reports(kind);

            -- Per-user daily analysis counter
            CREATE TABLE IF NOT EXISTS usage_quota (
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, day)
            );
        "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::new(&dir.path().join("test.db")).expect("store");
    (dir, store)
}
