//! Shared models
//!
//! Types passed between the worker, dedup and reporting stages.

use crate::camera_registry::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recognized identity on one camera at one instant.
///
/// Ephemeral: produced per accepted match, never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub identity: String,
    pub camera: CameraId,
    pub camera_name: String,
    pub timestamp: DateTime<Utc>,
    pub score: f32,
}

impl Sighting {
    pub fn new(
        identity: impl Into<String>,
        camera: CameraId,
        camera_name: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            identity: identity.into(),
            camera,
            camera_name: camera_name.into(),
            timestamp: Utc::now(),
            score,
        }
    }
}
