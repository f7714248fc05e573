//! Report cache rows and the atomic build claim.

use chrono::Utc;
use rusqlite::params;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{AnalysisKind, ReportStatus, RiskReport};

use super::{parse_datetime_opt, Result, Store, StoreError};

/// Ownership of one report build. The token must still match at write
/// time or the result is discarded.
#[derive(Debug, Clone)]
pub struct BuildClaim {
    pub fingerprint: String,
    pub token: String,
}

impl BuildClaim {
    fn new(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

/// Outcome of a cache consultation.
#[derive(Debug)]
pub enum CacheDecision {
    /// A completed, unexpired report exists.
    Hit(RiskReport),
    /// Another builder owns this fingerprint.
    InFlight,
    /// The caller owns the build.
    Claimed(BuildClaim),
}

/// What a GC pass removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcOutcome {
    pub raws_cleared: u64,
    pub rows_pruned: u64,
}

impl Store {
    /// Look up the live report row for `fingerprint`, or atomically
    /// claim the build. Exactly one caller per fingerprint gets
    /// `Claimed`; a pending row older than `build_timeout` is assumed
    /// dead and reclaimed under a fresh token.
    pub fn lookup_or_claim(
        &self,
        fingerprint: &str,
        kind: AnalysisKind,
        build_timeout: Duration,
    ) -> Result<CacheDecision> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<CacheDecision> = (|| {
            let now = Utc::now();
            let query_result = conn.query_row(
                r#"
                SELECT id, status, claimed_at, report, expires_at
                FROM reports
                WHERE fingerprint = ? AND superseded = 0
                "#,
                params![fingerprint],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            );

            let (id, status, claimed_at, report_json, expires_at) = match query_result {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    let claim = BuildClaim::new(fingerprint);
                    insert_pending(&conn, fingerprint, kind, &claim)?;
                    return Ok(CacheDecision::Claimed(claim));
                }
                Err(e) => return Err(e.into()),
            };

            match ReportStatus::from_str(&status) {
                Some(ReportStatus::Completed) => {
                    let expired = parse_datetime_opt(expires_at).is_some_and(|exp| exp <= now);
                    if !expired {
                        if let Some(json) = report_json {
                            let report: RiskReport = serde_json::from_str(&json)?;
                            return Ok(CacheDecision::Hit(report));
                        }
                    }
                    // Expired (or unreadable): keep the row for audit,
                    // build anew.
                    conn.execute(
                        "UPDATE reports SET superseded = 1 WHERE id = ?",
                        params![id],
                    )?;
                    let claim = BuildClaim::new(fingerprint);
                    insert_pending(&conn, fingerprint, kind, &claim)?;
                    Ok(CacheDecision::Claimed(claim))
                }
                Some(ReportStatus::Failed) => {
                    // Failed builds are never cached.
                    conn.execute(
                        "UPDATE reports SET superseded = 1 WHERE id = ?",
                        params![id],
                    )?;
                    let claim = BuildClaim::new(fingerprint);
                    insert_pending(&conn, fingerprint, kind, &claim)?;
                    Ok(CacheDecision::Claimed(claim))
                }
                _ => {
                    // pending | running
                    let stale = match parse_datetime_opt(claimed_at) {
                        Some(at) => (now - at).num_seconds() >= build_timeout.as_secs() as i64,
                        None => true,
                    };
                    if stale {
                        let claim = BuildClaim::new(fingerprint);
                        conn.execute(
                            "UPDATE reports SET status = 'pending', claim_token = ?, claimed_at = ? WHERE id = ?",
                            params![claim.token, now.to_rfc3339(), id],
                        )?;
                        tracing::warn!(fingerprint = %fingerprint, "reclaimed stale build");
                        Ok(CacheDecision::Claimed(claim))
                    } else {
                        Ok(CacheDecision::InFlight)
                    }
                }
            }
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Write a finished report under `claim`. Returns false when the
    /// claim went stale and another builder owns the row now.
    pub fn complete_build(&self, claim: &BuildClaim, report: &RiskReport) -> Result<bool> {
        let conn = self.connect()?;
        let json = serde_json::to_string(report)?;
        let affected = conn.execute(
            r#"
            UPDATE reports
            SET status = 'completed', report = ?, error_kind = NULL,
                produced_at = ?, expires_at = ?, claim_token = NULL, claimed_at = NULL
            WHERE fingerprint = ? AND superseded = 0 AND claim_token = ?
            "#,
            params![
                json,
                report.produced_at.to_rfc3339(),
                report.expires_at.map(|exp| exp.to_rfc3339()),
                claim.fingerprint,
                claim.token
            ],
        )?;
        Ok(affected == 1)
    }

    /// Record a failed build under `claim`. Same staleness rule as
    /// `complete_build`.
    pub fn fail_build(&self, claim: &BuildClaim, report: &RiskReport) -> Result<bool> {
        let conn = self.connect()?;
        let json = serde_json::to_string(report)?;
        let affected = conn.execute(
            r#"
            UPDATE reports
            SET status = 'failed', report = ?, error_kind = ?,
                produced_at = ?, claim_token = NULL, claimed_at = NULL
            WHERE fingerprint = ? AND superseded = 0 AND claim_token = ?
            "#,
            params![
                json,
                report.error_kind.map(|k| k.as_str()),
                report.produced_at.to_rfc3339(),
                claim.fingerprint,
                claim.token
            ],
        )?;
        Ok(affected == 1)
    }

    /// Read the live terminal report for a fingerprint, expired or not.
    /// Callers decide what expiry means for their view.
    pub fn get_report(&self, fingerprint: &str) -> Result<Option<RiskReport>> {
        let conn = self.connect()?;
        let query_result = conn.query_row(
            "SELECT report FROM reports WHERE fingerprint = ? AND superseded = 0 AND report IS NOT NULL",
            params![fingerprint],
            |row| row.get::<_, String>(0),
        );
        match query_result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Expire the live report for one fingerprint. The row stays for
    /// audit; the next lookup rebuilds.
    pub fn invalidate_fingerprint(&self, fingerprint: &str) -> Result<u64> {
        let conn = self.connect()?;
        let affected = conn.execute(
            "UPDATE reports SET expires_at = ? WHERE fingerprint = ? AND superseded = 0 AND status = 'completed'",
            params![Utc::now().to_rfc3339(), fingerprint],
        )?;
        Ok(affected as u64)
    }

    /// Expire all live reports of one kind whose fingerprint contains
    /// `pattern`.
    pub fn invalidate_matching(&self, kind: AnalysisKind, pattern: &str) -> Result<u64> {
        let conn = self.connect()?;
        let affected = conn.execute(
            r#"
            UPDATE reports SET expires_at = ?
            WHERE kind = ? AND superseded = 0 AND status = 'completed'
            AND instr(fingerprint, ?) > 0
            "#,
            params![Utc::now().to_rfc3339(), kind.as_str(), pattern],
        )?;
        Ok(affected as u64)
    }

    /// Clear raw vendor payloads from completed reports older than
    /// `keep_days`, and prune superseded rows and expired designer
    /// reports past the same cutoff.
    pub fn gc(&self, keep_days: u32) -> Result<GcOutcome> {
        let conn = self.connect()?;
        let now = Utc::now();
        let cutoff = (now - chrono::Duration::days(i64::from(keep_days))).to_rfc3339();

        let mut outcome = GcOutcome::default();

        let rows: Vec<(i64, String)> = {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, report FROM reports
                WHERE status = 'completed' AND report IS NOT NULL AND produced_at < ?
                "#,
            )?;
            let mapped = stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for (id, json) in rows {
            let mut report: RiskReport = match serde_json::from_str(&json) {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(row = id, error = %e, "skipping unreadable report during gc");
                    continue;
                }
            };
            if report.raw_vendor_payloads.is_empty() {
                continue;
            }
            report.raw_vendor_payloads.clear();
            conn.execute(
                "UPDATE reports SET report = ? WHERE id = ?",
                params![serde_json::to_string(&report)?, id],
            )?;
            outcome.raws_cleared += 1;
        }

        outcome.rows_pruned += conn.execute(
            "DELETE FROM reports WHERE superseded = 1 AND created_at < ?",
            params![cutoff],
        )? as u64;
        outcome.rows_pruned += conn.execute(
            "DELETE FROM reports WHERE superseded = 0 AND kind = 'designer' AND expires_at IS NOT NULL AND expires_at < ?",
            params![now.to_rfc3339()],
        )? as u64;

        Ok(outcome)
    }
}

fn insert_pending(
    conn: &rusqlite::Connection,
    fingerprint: &str,
    kind: AnalysisKind,
    claim: &BuildClaim,
) -> std::result::Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO reports (fingerprint, kind, status, claim_token, claimed_at, created_at)
        VALUES (?, ?, 'pending', ?, ?, ?)
        "#,
        params![fingerprint, kind.as_str(), claim.token, now, now],
    )?;
    Ok(())
}
