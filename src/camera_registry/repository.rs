//! CameraRegistry Repository
//!
//! Database access layer for the camera inventory (SQLite)

use super::types::{CameraDescriptor, CameraId, CaptureSource};
use super::CameraSource;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Raw camera row
#[derive(Debug, sqlx::FromRow)]
struct CameraRow {
    camera_id: i64,
    name: Option<String>,
    ip_address: String,
    is_active: bool,
}

impl From<CameraRow> for CameraDescriptor {
    fn from(row: CameraRow) -> Self {
        let display_name = row
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Camera-{}", row.camera_id));

        CameraDescriptor {
            id: CameraId::from(row.camera_id),
            display_name,
            source: CaptureSource::parse(&row.ip_address),
            active: row.is_active,
        }
    }
}

/// Camera repository backed by the attendance database
#[derive(Clone)]
pub struct SqlCameraRepository {
    pool: SqlitePool,
}

impl SqlCameraRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get active cameras
    pub async fn get_active_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let rows = sqlx::query_as::<_, CameraRow>(
            "SELECT camera_id, name, ip_address, is_active FROM cameras WHERE is_active = 1 ORDER BY camera_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CameraDescriptor::from).collect())
    }
}

#[async_trait]
impl CameraSource for SqlCameraRepository {
    async fn list_active_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        self.get_active_cameras().await
    }

    fn describe(&self) -> String {
        "sqlite:cameras".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE cameras (
                camera_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                ip_address TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_lists_only_active_cameras() {
        let pool = memory_pool().await;
        for (name, source, active) in [
            (Some("Gate"), "rtsp://10.0.0.5/live", 1),
            (Some("Lab"), "0", 0),
            (None, "http://10.0.0.9:4747/video", 1),
        ] {
            sqlx::query("INSERT INTO cameras (name, ip_address, is_active) VALUES (?, ?, ?)")
                .bind(name)
                .bind(source)
                .bind(active)
                .execute(&pool)
                .await
                .unwrap();
        }

        let repo = SqlCameraRepository::new(pool);
        let cameras = repo.list_active_cameras().await.unwrap();

        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id, CameraId::from(1_i64));
        assert_eq!(cameras[0].display_name, "Gate");
        assert_eq!(
            cameras[0].source,
            CaptureSource::Url("rtsp://10.0.0.5/live".to_string())
        );
        assert_eq!(cameras[1].display_name, "Camera-3");
        assert!(cameras.iter().all(|c| c.active));
    }

    #[tokio::test]
    async fn test_missing_table_is_an_error() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let repo = SqlCameraRepository::new(pool);
        assert!(repo.list_active_cameras().await.is_err());
    }
}
