//! FaceMatcher - Recognition capability adapter
//!
//! ## Responsibilities
//!
//! - Narrow interface to the external detection/embedding/search capability
//! - Ordered provider list; the first provider that passes its probe is
//!   selected once at startup and used for every frame afterwards
//!
//! Model loading, inference and index search live behind the provider.

mod client;
mod types;

pub use client::HttpFaceMatcher;
pub use types::*;

use crate::capture::Frame;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Face recognition capability
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Capability probe (reachable, model/index loaded)
    async fn probe(&self) -> Result<()>;

    /// Faces in one frame; unknown faces carry `UNKNOWN_IDENTITY`
    async fn match_faces(&self, frame: &Frame) -> Result<Vec<FaceMatch>>;
}

/// First provider, in order, whose probe succeeds
pub async fn select_provider(providers: &[Arc<dyn FaceMatcher>]) -> Option<Arc<dyn FaceMatcher>> {
    for provider in providers {
        match provider.probe().await {
            Ok(()) => {
                tracing::info!(provider = %provider.name(), "Face matcher provider selected");
                return Some(provider.clone());
            }
            Err(e) => {
                tracing::warn!(
                    provider = %provider.name(),
                    error = %e,
                    "Face matcher provider unavailable"
                );
            }
        }
    }
    None
}

/// Repeat `select_provider` until one is available or shutdown is requested
pub async fn wait_for_provider(
    providers: &[Arc<dyn FaceMatcher>],
    retry: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Arc<dyn FaceMatcher>> {
    loop {
        if *shutdown.borrow() {
            return None;
        }

        if let Some(provider) = select_provider(providers).await {
            return Some(provider);
        }

        tracing::warn!(
            retry_sec = retry.as_secs(),
            providers = providers.len(),
            "No face matcher provider ready, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}
