use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_battery, to_u64},
    models::Sample,
};

const SAMPLE_COLUMNS: &str =
    "id, latitude, longitude, altitude, accuracy, speed, bearing, timestamp, battery, synced";

fn row_to_sample(row: &Row) -> rusqlite::Result<Sample> {
    Ok(Sample {
        id: row.get("id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        accuracy: row.get::<_, f64>("accuracy")? as f32,
        speed: row.get::<_, f64>("speed")? as f32,
        bearing: row.get::<_, f64>("bearing")? as f32,
        timestamp_ms: row.get("timestamp")?,
        battery: parse_battery(row.get("battery")?),
        synced: row.get::<_, i64>("synced")? != 0,
    })
}

impl Database {
    /// Append an accepted sample and return its row id.
    pub async fn insert_sample(&self, sample: &Sample) -> Result<i64> {
        let record = sample.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO locations (latitude, longitude, altitude, accuracy, speed, bearing, timestamp, battery, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.latitude,
                    record.longitude,
                    record.altitude,
                    f64::from(record.accuracy),
                    f64::from(record.speed),
                    f64::from(record.bearing),
                    record.timestamp_ms,
                    record.battery.map(i64::from),
                    record.synced as i64,
                ],
            )
            .with_context(|| "failed to insert sample")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Every stored sample, oldest capture first.
    pub async fn get_all_samples(&self) -> Result<Vec<Sample>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM locations ORDER BY timestamp ASC, id ASC"
            ))?;
            let samples = stmt
                .query_map([], row_to_sample)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(samples)
        })
        .await
    }

    /// Samples not yet confirmed by the server, oldest capture first.
    pub async fn get_unsynced_samples(&self) -> Result<Vec<Sample>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM locations WHERE synced = 0 ORDER BY timestamp ASC, id ASC"
            ))?;
            let samples = stmt
                .query_map([], row_to_sample)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(samples)
        })
        .await
    }

    /// Flag the given rows as synced. Either every id is flagged or none is.
    pub async fn mark_samples_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open mark-synced transaction")?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare("UPDATE locations SET synced = 1 WHERE id = ?1")?;
                for id in &ids {
                    updated += stmt.execute(params![id])?;
                }
            }
            tx.commit().context("failed to commit mark-synced transaction")?;
            Ok(updated)
        })
        .await
    }

    /// Delete rows already confirmed by the server. Rows inserted while a
    /// sync was in flight are still unsynced and stay put.
    pub async fn purge_synced_samples(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn
                .execute("DELETE FROM locations WHERE synced = 1", [])
                .with_context(|| "failed to purge synced samples")?;
            Ok(deleted)
        })
        .await
    }

    /// Wipe the whole location table.
    pub async fn clear_samples(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn
                .execute("DELETE FROM locations", [])
                .with_context(|| "failed to clear samples")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn count_samples(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
            to_u64(count, "sample count")
        })
        .await
    }

    pub async fn count_unsynced_samples(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM locations WHERE synced = 0",
                [],
                |row| row.get(0),
            )?;
            to_u64(count, "unsynced sample count")
        })
        .await
    }
}
