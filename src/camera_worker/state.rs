//! Worker state and counters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Camera worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Opening the capture source (also the initial state)
    Connecting,
    /// Reading and processing frames
    Streaming,
    /// Capture lost, waiting before the next open
    Reconnecting,
    /// Terminal, reached only through cancellation
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Streaming => "streaming",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Per-worker counters, shared with the reconciler
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames_read: AtomicU64,
    frames_skipped: AtomicU64,
    sightings_reported: AtomicU64,
    report_failures: AtomicU64,
    connect_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            sightings_reported: self.sightings_reported.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn frame_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame dropped because the matcher failed or timed out
    pub(crate) fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sighting_reported(&self) {
        self.sightings_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_failed(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of `WorkerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub frames_read: u64,
    pub frames_skipped: u64,
    pub sightings_reported: u64,
    pub report_failures: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
}
