//! Submission and task persistence.

use chrono::Utc;
use rusqlite::params;

use crate::error::ErrorKind;
use crate::models::{Submission, Task, TaskState};

use super::{parse_datetime, parse_datetime_opt, Result, Store};

impl Store {
    pub fn insert_submission(&self, submission: &Submission) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO submissions (id, user_id, kind, subject, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                submission.id,
                submission.user_id,
                submission.kind.as_str(),
                serde_json::to_string(&submission.subject)?,
                submission.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO tasks (id, submission_id, fingerprint, state, created_at, started_at, finished_at, error_kind)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                task.id,
                task.submission_id,
                task.fingerprint,
                task.state.as_str(),
                task.created_at.to_rfc3339(),
                task.started_at.map(|at| at.to_rfc3339()),
                task.finished_at.map(|at| at.to_rfc3339()),
                task.error_kind.map(|k| k.as_str())
            ],
        )?;
        Ok(())
    }

    pub fn mark_task_running(&self, task_id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tasks SET state = 'running', started_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(())
    }

    /// Move a task to a terminal state.
    pub fn finish_task(
        &self,
        task_id: &str,
        state: TaskState,
        error_kind: Option<ErrorKind>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tasks SET state = ?, finished_at = ?, error_kind = ? WHERE id = ?",
            params![
                state.as_str(),
                Utc::now().to_rfc3339(),
                error_kind.map(|k| k.as_str()),
                task_id
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.connect()?;
        let query_result = conn.query_row(
            r#"
            SELECT id, submission_id, fingerprint, state, created_at, started_at, finished_at, error_kind
            FROM tasks WHERE id = ?
            "#,
            params![task_id],
            |row| {
                Ok(Task {
                    id: row.get(0)?,
                    submission_id: row.get(1)?,
                    fingerprint: row.get(2)?,
                    state: TaskState::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(TaskState::Failed),
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                    started_at: parse_datetime_opt(row.get(5)?),
                    finished_at: parse_datetime_opt(row.get(6)?),
                    error_kind: row
                        .get::<_, Option<String>>(7)?
                        .and_then(|s| ErrorKind::from_str(&s)),
                })
            },
        );
        match query_result {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>> {
        let conn = self.connect()?;
        let query_result = conn.query_row(
            "SELECT id, user_id, subject, created_at FROM submissions WHERE id = ?",
            params![submission_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );
        let (id, user_id, subject_json, created_at) = match query_result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let subject = serde_json::from_str(&subject_json)?;
        let mut submission = Submission::new(user_id, subject);
        submission.id = id;
        submission.created_at = parse_datetime(&created_at);
        Ok(Some(submission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subject;
    use crate::store::test_store;

    #[test]
    fn test_task_round_trip_and_transitions() {
        let (_dir, store) = test_store();

        let submission = Submission::new(
            "user-7",
            Subject::Company {
                name: "北京某某装饰工程有限公司".to_string(),
                region: None,
            },
        );
        store.insert_submission(&submission).unwrap();

        let task = Task::new(submission.id.clone(), "f".repeat(64), TaskState::Queued);
        store.insert_task(&task).unwrap();

        store.mark_task_running(&task.id).unwrap();
        let running = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(running.state, TaskState::Running);
        assert!(running.started_at.is_some());

        store
            .finish_task(&task.id, TaskState::Failed, Some(ErrorKind::Timeout))
            .unwrap();
        let failed = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::Timeout));
        assert!(failed.finished_at.is_some());
    }

    #[test]
    fn test_get_submission_round_trip() {
        let (_dir, store) = test_store();

        let submission = Submission::new(
            "anonymous",
            Subject::Designer {
                question: "小户型客厅如何布置".to_string(),
                image_keys: vec![],
            },
        );
        store.insert_submission(&submission).unwrap();

        let loaded = store.get_submission(&submission.id).unwrap().unwrap();
        assert_eq!(loaded.id, submission.id);
        assert_eq!(loaded.kind, submission.kind);
        assert_eq!(loaded.user_id, "anonymous");
    }

    #[test]
    fn test_get_task_missing_is_none() {
        let (_dir, store) = test_store();
        assert!(store.get_task("nope").unwrap().is_none());
    }
}
