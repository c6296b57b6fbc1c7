//! JSON file camera inventory

use super::types::{CameraDescriptor, CameraId, CaptureSource};
use super::CameraSource;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// One entry of the cameras file
#[derive(Debug, Deserialize)]
struct CameraEntry {
    id: serde_json::Value,
    #[serde(default)]
    name: Option<String>,
    source: serde_json::Value,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Render a JSON scalar (number or string) as plain text
fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Camera list read from a JSON file on every call
pub struct FileCameraSource {
    path: PathBuf,
}

impl FileCameraSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(raw: &str) -> Result<Vec<CameraDescriptor>> {
        let entries: Vec<CameraEntry> = serde_json::from_str(raw)?;
        let mut cameras = Vec::with_capacity(entries.len());

        for entry in entries {
            let (Some(id), Some(source)) = (scalar_text(&entry.id), scalar_text(&entry.source))
            else {
                tracing::warn!(entry = ?entry, "Skipping camera entry with invalid id/source");
                continue;
            };

            let display_name = entry
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Camera-{}", id));

            cameras.push(CameraDescriptor {
                id: CameraId::new(id),
                display_name,
                source: CaptureSource::parse(&source),
                active: entry.active,
            });
        }

        Ok(cameras)
    }
}

#[async_trait]
impl CameraSource for FileCameraSource {
    async fn list_active_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let cameras = Self::parse(&raw)?;
        Ok(cameras.into_iter().filter(|c| c.active).collect())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
