//! Storage Layer
//!
//! Camera registry and detection log contracts, with an in-memory
//! repository for tests and a SQLite repository for the service.

mod repository;
mod sqlite;

pub use repository::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Invalid camera status: {0}")]
    InvalidStatus(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

/// Registry identity of a camera
pub type CameraId = i64;

/// Camera lifecycle status as stored in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraStatus {
    Inactive,
    Active,
    Error,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Inactive => "Inactive",
            CameraStatus::Active => "Active",
            CameraStatus::Error => "Error",
        }
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inactive" => Ok(CameraStatus::Inactive),
            "active" => Ok(CameraStatus::Active),
            "error" => Ok(CameraStatus::Error),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }
}

/// Camera as known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: CameraId,
    /// Human-readable name
    pub label: String,
    /// Source locator: file path, stream URL or device index
    pub src: String,
    pub status: CameraStatus,
}

/// Alert record to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetectionLog {
    pub camera_id: CameraId,
    /// Camera label at the time of the alert
    pub camera_label: String,
    pub emotion: String,
    pub confidence: f32,
    /// Public path of the saved face crop
    pub image_path: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionLog {
    pub id: i64,
    pub camera_id: CameraId,
    pub camera_label: String,
    pub emotion: String,
    pub confidence: f32,
    pub image_path: String,
    pub timestamp: DateTime<Utc>,
}

impl DetectionLog {
    fn from_new(id: i64, log: NewDetectionLog) -> Self {
        Self {
            id,
            camera_id: log.camera_id,
            camera_label: log.camera_label,
            emotion: log.emotion,
            confidence: log.confidence,
            image_path: log.image_path,
            timestamp: log.timestamp,
        }
    }
}

/// Read and update access to the external camera registry
#[async_trait]
pub trait CameraRegistry: Send + Sync {
    /// All cameras whose status is Active
    async fn get_active(&self) -> Result<Vec<CameraRecord>, StorageError>;

    /// Look up a camera; `None` if it no longer exists
    async fn get(&self, id: CameraId) -> Result<Option<CameraRecord>, StorageError>;

    /// Update a camera's status
    async fn set_status(&self, id: CameraId, status: CameraStatus) -> Result<(), StorageError>;
}

/// Append-only store of alert records
#[async_trait]
pub trait DetectionLogStore: Send + Sync {
    /// Persist one alert, returning its id
    async fn save(&self, log: NewDetectionLog) -> Result<i64, StorageError>;

    /// Most recent alerts, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<DetectionLog>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("Active".parse::<CameraStatus>().unwrap(), CameraStatus::Active);
        assert_eq!("inactive".parse::<CameraStatus>().unwrap(), CameraStatus::Inactive);
        assert_eq!("ERROR".parse::<CameraStatus>().unwrap(), CameraStatus::Error);
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(matches!(
            "paused".parse::<CameraStatus>(),
            Err(StorageError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [CameraStatus::Inactive, CameraStatus::Active, CameraStatus::Error] {
            assert_eq!(status.as_str().parse::<CameraStatus>().unwrap(), status);
        }
    }
}
