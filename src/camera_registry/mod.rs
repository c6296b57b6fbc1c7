//! CameraRegistry - Desired camera inventory
//!
//! ## Responsibilities
//!
//! - List the cameras that should currently be processed
//! - Normalize stored rows/entries into `CameraDescriptor`
//!
//! ## Design Principles
//!
//! - No caching: every call re-reads the backing store, the reconciler
//!   decides what a failed read means
//! - The listing is fallible; callers own the fail-safe policy

mod file_source;
mod repository;
mod types;

pub use file_source::FileCameraSource;
pub use repository::SqlCameraRepository;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Source of the desired camera set
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Active cameras right now
    async fn list_active_cameras(&self) -> Result<Vec<CameraDescriptor>>;

    /// Human readable origin for logs
    fn describe(&self) -> String;
}

/// Keep the first descriptor per id and drop inactive entries
///
/// Distinct cameras sharing a display name are kept but share one
/// per-camera cooldown, which is logged.
pub fn normalize_listing(cameras: Vec<CameraDescriptor>) -> Vec<CameraDescriptor> {
    let mut seen = HashSet::new();
    let mut names = HashSet::new();
    cameras
        .into_iter()
        .filter(|camera| camera.active)
        .filter(|camera| {
            let first = seen.insert(camera.id.clone());
            if !first {
                tracing::warn!(
                    camera_id = %camera.id,
                    display_name = %camera.display_name,
                    "Duplicate camera id in listing, ignoring later entry"
                );
            } else if !names.insert(camera.display_name.clone()) {
                tracing::warn!(
                    camera_id = %camera.id,
                    display_name = %camera.display_name,
                    "Display name already used by another camera, cooldowns are shared"
                );
            }
            first
        })
        .collect()
}
