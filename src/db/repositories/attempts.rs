use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_attempt_status, placeholders, to_i64, to_u32, to_u64},
    models::{Attempt, AttemptStats},
};

/// Default page size for the recent-attempts view.
pub const DEFAULT_RECENT_ATTEMPTS: usize = 100;

// Keeps `IN (...)` lists below SQLite's bound-parameter limit.
const DELETE_CHUNK: usize = 500;

fn row_to_attempt(row: &Row) -> Result<Attempt> {
    let status: String = row.get("status")?;
    let accuracy: Option<f64> = row.get("accuracy")?;

    Ok(Attempt {
        id: row.get("id")?,
        timestamp_ms: row.get("timestamp")?,
        satellites: to_u32(row.get("satellites")?, "satellites")?,
        accuracy: accuracy.filter(|value| *value >= 0.0).map(|value| value as f32),
        status: parse_attempt_status(&status)?,
        reason: row.get("reason")?,
    })
}

impl Database {
    pub async fn insert_attempt(&self, attempt: &Attempt) -> Result<i64> {
        let record = attempt.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO attempts (timestamp, satellites, accuracy, status, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.timestamp_ms,
                    i64::from(record.satellites),
                    record.accuracy.map(f64::from),
                    record.status.as_str(),
                    record.reason,
                ],
            )
            .with_context(|| "failed to insert attempt")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent attempts first.
    pub async fn get_recent_attempts(&self, limit: usize) -> Result<Vec<Attempt>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, satellites, accuracy, status, reason
                 FROM attempts
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut attempts = Vec::new();
            while let Some(row) = rows.next()? {
                attempts.push(row_to_attempt(row)?);
            }
            Ok(attempts)
        })
        .await
    }

    pub async fn get_attempt_stats(&self) -> Result<AttemptStats> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM attempts GROUP BY status")?;
            let mut rows = stmt.query([])?;
            let mut stats = AttemptStats::default();
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                stats.add(parse_attempt_status(&status)?, to_u64(count, "attempt count")?);
            }
            Ok(stats)
        })
        .await
    }

    pub async fn count_attempts(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM attempts", [], |row| row.get(0))?;
            to_u64(count, "attempt count")
        })
        .await
    }

    /// Remove exactly the given attempts, inside one transaction.
    pub async fn delete_attempts(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open attempt delete transaction")?;
            let mut deleted = 0;
            for chunk in ids.chunks(DELETE_CHUNK) {
                let sql = format!(
                    "DELETE FROM attempts WHERE id IN ({})",
                    placeholders(chunk.len())
                );
                deleted += tx.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            tx.commit()
                .context("failed to commit attempt delete transaction")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn clear_attempts(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn
                .execute("DELETE FROM attempts", [])
                .with_context(|| "failed to clear attempts")?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AttemptStatus;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("attempts.sqlite3")).unwrap();
        (dir, db)
    }

    fn attempt(timestamp_ms: i64, status: AttemptStatus) -> Attempt {
        Attempt {
            id: None,
            timestamp_ms,
            satellites: 6,
            accuracy: Some(42.0),
            status,
            reason: "acceptable precision".into(),
        }
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_bounded() {
        let (_dir, db) = open();
        for ts in [1_000, 4_000, 2_000, 3_000] {
            db.insert_attempt(&attempt(ts, AttemptStatus::Success))
                .await
                .unwrap();
        }

        let recent = db.get_recent_attempts(3).await.unwrap();
        let times: Vec<i64> = recent.iter().map(|a| a.timestamp_ms).collect();
        assert_eq!(times, vec![4_000, 3_000, 2_000]);
    }

    #[tokio::test]
    async fn unknown_accuracy_round_trips() {
        let (_dir, db) = open();
        let mut record = attempt(1_000, AttemptStatus::NoSignal);
        record.accuracy = None;
        record.satellites = 0;
        db.insert_attempt(&record).await.unwrap();

        let stored = db.get_recent_attempts(1).await.unwrap().remove(0);
        assert_eq!(stored.accuracy, None);
        assert_eq!(stored.status, AttemptStatus::NoSignal);
        assert_eq!(stored.satellites, 0);
    }

    #[tokio::test]
    async fn stats_group_by_status() {
        let (_dir, db) = open();
        db.insert_attempt(&attempt(1, AttemptStatus::Success)).await.unwrap();
        db.insert_attempt(&attempt(2, AttemptStatus::Success)).await.unwrap();
        db.insert_attempt(&attempt(3, AttemptStatus::PoorAccuracy)).await.unwrap();
        db.insert_attempt(&attempt(4, AttemptStatus::Timeout)).await.unwrap();

        let stats = db.get_attempt_stats().await.unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.poor_accuracy, 1);
        assert_eq!(stats.no_signal, 0);
        assert_eq!(stats.timeout, 1);
        assert_eq!(stats.total(), 4);
        assert!((stats.success_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn delete_by_ids_leaves_others() {
        let (_dir, db) = open();
        let a = db.insert_attempt(&attempt(1, AttemptStatus::Success)).await.unwrap();
        let b = db.insert_attempt(&attempt(2, AttemptStatus::Success)).await.unwrap();
        db.insert_attempt(&attempt(3, AttemptStatus::Success)).await.unwrap();

        assert_eq!(db.delete_attempts(&[a, b]).await.unwrap(), 2);
        assert_eq!(db.count_attempts().await.unwrap(), 1);
        assert_eq!(db.delete_attempts(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_empties_log() {
        let (_dir, db) = open();
        db.insert_attempt(&attempt(1, AttemptStatus::Timeout)).await.unwrap();
        assert_eq!(db.clear_attempts().await.unwrap(), 1);
        assert_eq!(db.get_attempt_stats().await.unwrap(), AttemptStats::default());
    }
}
