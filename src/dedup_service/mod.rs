//! DedupService - Recognition cooldown guard
//!
//! ## Responsibilities
//!
//! - Decide whether a recognized identity should be reported (`should_count`)
//! - Record successful reports (`record_seen`)
//! - Two independent guards: per (identity, camera) and per identity across cameras
//!
//! `should_count` is a pure check. State only moves through `record_seen`,
//! which workers call after the attendance sink acknowledged the sighting,
//! so a failed report never burns the cooldown.
//!
//! Both maps sit behind one mutex. The lock is never held across an await
//! point that leaves this module.

use crate::face_matcher::is_unknown;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default per-camera cooldown (15s)
const DEFAULT_SAME_CAMERA_COOLDOWN_SECS: u64 = 15;
/// Default cross-camera cooldown (30s)
const DEFAULT_CROSS_CAMERA_COOLDOWN_SECS: u64 = 30;

/// Score acceptance policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreThreshold {
    /// Similarity scale: reject when `score < value`
    MinSimilarity(f32),
    /// Distance scale: reject when `score > value`
    MaxDistance(f32),
}

impl ScoreThreshold {
    pub fn accepts(&self, score: f32) -> bool {
        if score.is_nan() {
            return false;
        }
        match *self {
            ScoreThreshold::MinSimilarity(min) => score >= min,
            ScoreThreshold::MaxDistance(max) => score <= max,
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            ScoreThreshold::MinSimilarity(v) | ScoreThreshold::MaxDistance(v) => v,
        }
    }
}

/// Cooldown policy
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    pub same_camera_cooldown: Duration,
    pub cross_camera_cooldown: Duration,
    pub threshold: Option<ScoreThreshold>,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            same_camera_cooldown: Duration::from_secs(DEFAULT_SAME_CAMERA_COOLDOWN_SECS),
            cross_camera_cooldown: Duration::from_secs(DEFAULT_CROSS_CAMERA_COOLDOWN_SECS),
            threshold: None,
        }
    }
}

impl DedupPolicy {
    /// Entries older than this can no longer reject anything
    pub fn retention(&self) -> Duration {
        self.same_camera_cooldown.max(self.cross_camera_cooldown) * 2
    }
}

/// Last-seen bookkeeping
#[derive(Debug, Default)]
struct CooldownState {
    /// (identity, camera) -> last reported
    per_camera: HashMap<(String, String), Instant>,
    /// identity -> last reported on any camera
    global: HashMap<String, Instant>,
}

/// Why a sighting was not counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownIdentity,
    ScoreThreshold,
    SameCameraCooldown,
    CrossCameraCooldown,
}

/// Two-level dedup guard shared by all camera workers
pub struct Deduper {
    policy: DedupPolicy,
    state: Mutex<CooldownState>,
}

impl Deduper {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(CooldownState::default()),
        }
    }

    pub fn policy(&self) -> &DedupPolicy {
        &self.policy
    }

    /// Whether a sighting should be reported now. Never mutates state, so
    /// callers checking the same identity before either records both pass.
    pub async fn should_count(&self, identity: &str, camera: &str, score: f32) -> bool {
        match self.check(identity, camera, score).await {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(
                    identity = %identity,
                    camera = %camera,
                    score = score,
                    reason = ?reason,
                    "Sighting suppressed"
                );
                false
            }
        }
    }

    /// Same as `should_count` but tells the caller which guard fired
    pub async fn check(
        &self,
        identity: &str,
        camera: &str,
        score: f32,
    ) -> Result<(), Rejection> {
        if identity.is_empty() || is_unknown(identity) {
            return Err(Rejection::UnknownIdentity);
        }

        if let Some(threshold) = self.policy.threshold {
            if !threshold.accepts(score) {
                return Err(Rejection::ScoreThreshold);
            }
        }

        let now = Instant::now();
        let state = self.state.lock().await;

        if let Some(last) = state
            .per_camera
            .get(&(identity.to_string(), camera.to_string()))
        {
            if now.saturating_duration_since(*last) < self.policy.same_camera_cooldown {
                return Err(Rejection::SameCameraCooldown);
            }
        }

        if let Some(last) = state.global.get(identity) {
            if now.saturating_duration_since(*last) < self.policy.cross_camera_cooldown {
                return Err(Rejection::CrossCameraCooldown);
            }
        }

        Ok(())
    }

    /// Stamp both guards with the current time
    pub async fn record_seen(&self, identity: &str, camera: &str) {
        if identity.is_empty() || is_unknown(identity) {
            return;
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state
            .per_camera
            .insert((identity.to_string(), camera.to_string()), now);
        state.global.insert(identity.to_string(), now);
    }

    /// Drop entries that are past twice the longest cooldown.
    ///
    /// Returns the number of removed entries.
    pub async fn prune_stale(&self) -> usize {
        let retention = self.policy.retention();
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let before = state.per_camera.len() + state.global.len();
        state
            .per_camera
            .retain(|_, seen| now.saturating_duration_since(*seen) < retention);
        state
            .global
            .retain(|_, seen| now.saturating_duration_since(*seen) < retention);
        let removed = before - (state.per_camera.len() + state.global.len());

        if removed > 0 {
            tracing::debug!(removed = removed, "Pruned stale cooldown entries");
        }
        removed
    }

    /// (per-camera entries, global entries)
    pub async fn tracked(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.per_camera.len(), state.global.len())
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new(DedupPolicy::default())
    }
}
