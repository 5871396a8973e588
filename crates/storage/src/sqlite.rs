//! SQLite repository

use crate::{
    CameraId, CameraRecord, CameraRegistry, CameraStatus, DetectionLog, DetectionLogStore,
    NewDetectionLog, StorageError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cameras (
    id      INTEGER PRIMARY KEY,
    label   TEXT NOT NULL,
    src     TEXT NOT NULL,
    status  TEXT NOT NULL DEFAULT 'Inactive'
);

CREATE TABLE IF NOT EXISTS detection_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id     INTEGER NOT NULL,
    camera_label  TEXT NOT NULL,
    emotion       TEXT NOT NULL,
    confidence    REAL NOT NULL,
    image_path    TEXT NOT NULL,
    timestamp     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detection_logs_timestamp ON detection_logs (timestamp);
"#;

/// Registry and log store backed by SQLite
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `url` and apply the schema
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Opening SQLite database: {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Private in-memory database (single connection)
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema applied");
        Ok(())
    }

    /// Insert or replace a camera
    pub async fn upsert_camera(&self, camera: &CameraRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO cameras (id, label, src, status) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, src = excluded.src, status = excluded.status",
        )
        .bind(camera.id)
        .bind(&camera.label)
        .bind(&camera.src)
        .bind(camera.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn camera_from_row(row: &SqliteRow) -> Result<CameraRecord, StorageError> {
    let status: String = row.try_get("status")?;
    Ok(CameraRecord {
        id: row.try_get("id")?,
        label: row.try_get("label")?,
        src: row.try_get("src")?,
        status: CameraStatus::from_str(&status)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<DetectionLog, StorageError> {
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", timestamp, e)))?
        .with_timezone(&Utc);
    let confidence: f64 = row.try_get("confidence")?;
    Ok(DetectionLog {
        id: row.try_get("id")?,
        camera_id: row.try_get("camera_id")?,
        camera_label: row.try_get("camera_label")?,
        emotion: row.try_get("emotion")?,
        confidence: confidence as f32,
        image_path: row.try_get("image_path")?,
        timestamp,
    })
}

#[async_trait]
impl CameraRegistry for SqliteRepository {
    async fn get_active(&self) -> Result<Vec<CameraRecord>, StorageError> {
        let rows = sqlx::query("SELECT id, label, src, status FROM cameras WHERE status = ? ORDER BY id")
            .bind(CameraStatus::Active.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(camera_from_row).collect()
    }

    async fn get(&self, id: CameraId) -> Result<Option<CameraRecord>, StorageError> {
        let row = sqlx::query("SELECT id, label, src, status FROM cameras WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(camera_from_row).transpose()
    }

    async fn set_status(&self, id: CameraId, status: CameraStatus) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE cameras SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        debug!(camera_id = id, status = status.as_str(), "Camera status updated");
        Ok(())
    }
}

#[async_trait]
impl DetectionLogStore for SqliteRepository {
    async fn save(&self, log: NewDetectionLog) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO detection_logs (camera_id, camera_label, emotion, confidence, image_path, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(log.camera_id)
        .bind(&log.camera_label)
        .bind(&log.emotion)
        .bind(log.confidence as f64)
        .bind(&log.image_path)
        .bind(log.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DetectionLog>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, camera_id, camera_label, emotion, confidence, image_path, timestamp
             FROM detection_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }
}
