//! Counting queries for the admin surface.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::{Result, Store};

/// Persistent-side counters for `/api/admin/stats`.
#[derive(Debug, Default, Serialize)]
pub struct StoreStats {
    pub tasks_by_state: BTreeMap<String, u64>,
    pub reports_by_kind: BTreeMap<String, u64>,
    pub completed_reports: u64,
    pub expired_reports: u64,
    pub superseded_reports: u64,
}

impl Store {
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connect()?;
        let mut stats = StoreStats::default();

        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (state, count) = row?;
            stats.tasks_by_state.insert(state, count);
        }

        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM reports WHERE superseded = 0 GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (kind, count) = row?;
            stats.reports_by_kind.insert(kind, count);
        }

        stats.completed_reports = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE superseded = 0 AND status = 'completed'",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;

        let now = chrono::Utc::now().to_rfc3339();
        stats.expired_reports = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE superseded = 0 AND expires_at IS NOT NULL AND expires_at < ?",
            params![now],
            |row| row.get::<_, i64>(0),
        )? as u64;

        stats.superseded_reports = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE superseded = 1",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;

        Ok(stats)
    }
}
