//! Per-user daily analysis quota.
//!
//! Counted per calendar day (UTC). Cache hits never consume quota, so
//! the counter is only touched when real work is enqueued.

use rusqlite::params;

use super::{Result, Store};

impl Store {
    /// Consume one quota unit for `user_id` on `day` (YYYY-MM-DD).
    /// Returns false when the limit is already reached; nothing is
    /// consumed in that case.
    pub fn consume_quota(&self, user_id: &str, day: &str, limit: u32) -> Result<bool> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<bool> = (|| {
            let used: u32 = match conn.query_row(
                "SELECT used FROM usage_quota WHERE user_id = ? AND day = ?",
                params![user_id, day],
                |row| row.get(0),
            ) {
                Ok(used) => used,
                Err(rusqlite::Error::QueryReturnedNoRows) => 0,
                Err(e) => return Err(e.into()),
            };

            if used >= limit {
                return Ok(false);
            }

            conn.execute(
                r#"
                INSERT INTO usage_quota (user_id, day, used) VALUES (?, ?, 1)
                ON CONFLICT(user_id, day) DO UPDATE SET used = used + 1
                "#,
                params![user_id, day],
            )?;
            Ok(true)
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    pub fn quota_used(&self, user_id: &str, day: &str) -> Result<u32> {
        let conn = self.connect()?;
        match conn.query_row(
            "SELECT used FROM usage_quota WHERE user_id = ? AND day = ?",
            params![user_id, day],
            |row| row.get(0),
        ) {
            Ok(used) => Ok(used),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_store;

    #[test]
    fn test_quota_consumes_to_limit_then_rejects() {
        let (_dir, store) = test_store();

        for _ in 0..3 {
            assert!(store.consume_quota("user-1", "2026-08-22", 3).unwrap());
        }
        assert!(!store.consume_quota("user-1", "2026-08-22", 3).unwrap());
        assert_eq!(store.quota_used("user-1", "2026-08-22").unwrap(), 3);
    }

    #[test]
    fn test_quota_is_per_user_and_per_day() {
        let (_dir, store) = test_store();

        assert!(store.consume_quota("user-1", "2026-08-22", 1).unwrap());
        assert!(!store.consume_quota("user-1", "2026-08-22", 1).unwrap());

        // A different user and a different day both start fresh.
        assert!(store.consume_quota("user-2", "2026-08-22", 1).unwrap());
        assert!(store.consume_quota("user-1", "2026-08-23", 1).unwrap());
    }
}
