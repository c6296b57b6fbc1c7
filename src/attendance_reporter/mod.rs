//! AttendanceReporter - Delivery of accepted sightings
//!
//! ## Responsibilities
//!
//! - One outbound POST per accepted sighting
//! - Bounded timeout, success = any 2xx
//! - Never fails the caller: every error is logged and reported as `false`
//!
//! No retry happens here. The next natural sighting re-triggers delivery
//! because workers only advance the cooldown after a `true`.

use crate::config::MAX_REPORT_TIMEOUT;
use crate::error::Result;
use crate::models::Sighting;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attendance sink
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    /// `true` once the sink acknowledged the sighting
    async fn report(&self, sighting: &Sighting) -> bool;
}

/// Request body sent to the attendance endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AttendancePayload<'a> {
    pub identity: &'a str,
    /// Same as `identity`, for sinks that key on roll numbers
    pub roll_no: &'a str,
    pub camera: &'a str,
    pub camera_id: &'a str,
    pub camera_name: &'a str,
    pub timestamp: String,
    pub score: f32,
    pub sighting_id: String,
}

impl<'a> AttendancePayload<'a> {
    pub fn from_sighting(sighting: &'a Sighting) -> Self {
        Self {
            identity: &sighting.identity,
            roll_no: &sighting.identity,
            camera: sighting.camera.as_str(),
            camera_id: sighting.camera.as_str(),
            camera_name: &sighting.camera_name,
            timestamp: sighting.timestamp.to_rfc3339(),
            score: sighting.score,
            sighting_id: Uuid::new_v4().to_string(),
        }
    }
}

/// HTTP attendance sink client
pub struct HttpAttendanceReporter {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpAttendanceReporter {
    /// Create new reporter
    ///
    /// `timeout` is clamped to 5s.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let timeout = timeout.min(MAX_REPORT_TIMEOUT);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl AttendanceSink for HttpAttendanceReporter {
    async fn report(&self, sighting: &Sighting) -> bool {
        let payload = AttendancePayload::from_sighting(sighting);

        debug!(
            identity = %sighting.identity,
            camera_id = %sighting.camera,
            sighting_id = %payload.sighting_id,
            "Reporting attendance"
        );

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(
                    identity = %sighting.identity,
                    camera_id = %sighting.camera,
                    camera_name = %sighting.camera_name,
                    score = sighting.score,
                    "Attendance reported"
                );
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    identity = %sighting.identity,
                    camera_id = %sighting.camera,
                    status = %status,
                    body = %body,
                    "Attendance sink rejected sighting"
                );
                false
            }
            Err(e) => {
                warn!(
                    identity = %sighting.identity,
                    camera_id = %sighting.camera,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Attendance sink unreachable"
                );
                false
            }
        }
    }
}
