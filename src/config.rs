//! Application configuration
//!
//! Every value comes from the environment (after `.env` is loaded) with a
//! built-in fallback. Component configs are carved out of [`AppConfig`] so
//! each component only sees the knobs it owns.

use crate::dedup_service::{DedupPolicy, ScoreThreshold};
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the attendance sink call
pub const MAX_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite URL of the camera inventory (selects the database source)
    pub database_url: Option<String>,
    /// JSON camera list used when no database is configured
    pub cameras_file: PathBuf,
    /// Attendance sink endpoint
    pub attendance_url: String,
    /// Attendance sink timeout
    pub attendance_timeout: Duration,
    /// Ordered face matcher providers
    pub matcher_urls: Vec<String>,
    /// Per-frame matcher timeout
    pub matcher_timeout: Duration,
    /// Delay between provider selection rounds at startup
    pub matcher_probe_retry: Duration,
    /// ffmpeg binary used for capture
    pub ffmpeg_bin: String,
    /// ffmpeg output frame rate
    pub capture_fps: u32,
    /// How long a new worker waits for a capture source still held by an old one
    pub capture_lease_wait: Duration,
    pub dedup: DedupPolicy,
    pub worker: WorkerConfig,
    pub reconciler: ReconcilerConfig,
}

/// Per-camera worker timings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait before retrying a failed capture open
    pub connect_backoff: Duration,
    /// Wait after a failed frame read before reconnecting
    pub read_failure_backoff: Duration,
    /// A read that stalls longer than this is a read failure
    pub frame_read_timeout: Duration,
    /// Pause between processed frames
    pub frame_interval: Duration,
    /// Matcher call bound
    pub matcher_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            connect_backoff: Duration::from_secs(30),
            read_failure_backoff: Duration::from_secs(5),
            frame_read_timeout: Duration::from_secs(10),
            frame_interval: Duration::from_millis(50),
            matcher_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconciliation loop timings
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            cameras_file: PathBuf::from("cameras.json"),
            attendance_url: "http://localhost:5000/attendance/mark".to_string(),
            attendance_timeout: MAX_REPORT_TIMEOUT,
            matcher_urls: vec!["http://localhost:8000".to_string()],
            matcher_timeout: Duration::from_secs(10),
            matcher_probe_retry: Duration::from_secs(30),
            ffmpeg_bin: "ffmpeg".to_string(),
            capture_fps: 10,
            capture_lease_wait: Duration::from_millis(2000),
            dedup: DedupPolicy::default(),
            worker: WorkerConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| -> Result<Duration> {
            Ok(parse_opt::<u64>(&lookup, key)?
                .map(Duration::from_secs)
                .unwrap_or(fallback))
        };
        let millis = |key: &str, fallback: Duration| -> Result<Duration> {
            Ok(parse_opt::<u64>(&lookup, key)?
                .map(Duration::from_millis)
                .unwrap_or(fallback))
        };

        let matcher_urls = lookup("MATCHER_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.matcher_urls);

        let threshold = match (
            parse_opt::<f32>(&lookup, "MIN_ACCEPTED_SCORE")?,
            parse_opt::<f32>(&lookup, "MAX_ACCEPTED_DISTANCE")?,
        ) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "MIN_ACCEPTED_SCORE and MAX_ACCEPTED_DISTANCE are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(min), None) => Some(ScoreThreshold::MinSimilarity(min)),
            (None, Some(max)) => Some(ScoreThreshold::MaxDistance(max)),
            (None, None) => None,
        };

        let matcher_timeout = millis("MATCHER_TIMEOUT_MS", defaults.matcher_timeout)?;

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            cameras_file: lookup("CAMERAS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cameras_file),
            attendance_url: lookup("ATTENDANCE_URL").unwrap_or(defaults.attendance_url),
            attendance_timeout: millis("ATTENDANCE_TIMEOUT_MS", defaults.attendance_timeout)?
                .min(MAX_REPORT_TIMEOUT),
            matcher_urls,
            matcher_timeout,
            matcher_probe_retry: secs("MATCHER_PROBE_RETRY_SEC", defaults.matcher_probe_retry)?,
            ffmpeg_bin: lookup("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            capture_fps: parse_opt(&lookup, "CAPTURE_FPS")?.unwrap_or(defaults.capture_fps),
            capture_lease_wait: millis("CAPTURE_LEASE_WAIT_MS", defaults.capture_lease_wait)?,
            dedup: DedupPolicy {
                same_camera_cooldown: secs(
                    "SAME_CAMERA_COOLDOWN_SEC",
                    defaults.dedup.same_camera_cooldown,
                )?,
                cross_camera_cooldown: secs(
                    "CROSS_CAMERA_COOLDOWN_SEC",
                    defaults.dedup.cross_camera_cooldown,
                )?,
                threshold,
            },
            worker: WorkerConfig {
                connect_backoff: secs("CONNECT_BACKOFF_SEC", defaults.worker.connect_backoff)?,
                read_failure_backoff: secs(
                    "READ_FAILURE_BACKOFF_SEC",
                    defaults.worker.read_failure_backoff,
                )?,
                frame_read_timeout: secs(
                    "FRAME_READ_TIMEOUT_SEC",
                    defaults.worker.frame_read_timeout,
                )?,
                frame_interval: millis("FRAME_INTERVAL_MS", defaults.worker.frame_interval)?,
                matcher_timeout,
            },
            reconciler: ReconcilerConfig {
                poll_interval: secs(
                    "RECONCILE_INTERVAL_SEC",
                    defaults.reconciler.poll_interval,
                )?,
                stop_timeout: secs("WORKER_STOP_TIMEOUT_SEC", defaults.reconciler.stop_timeout)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("RECONCILE_INTERVAL_SEC", self.reconciler.poll_interval),
            ("WORKER_STOP_TIMEOUT_SEC", self.reconciler.stop_timeout),
            ("CONNECT_BACKOFF_SEC", self.worker.connect_backoff),
            ("READ_FAILURE_BACKOFF_SEC", self.worker.read_failure_backoff),
            ("FRAME_READ_TIMEOUT_SEC", self.worker.frame_read_timeout),
            ("MATCHER_TIMEOUT_MS", self.worker.matcher_timeout),
            ("ATTENDANCE_TIMEOUT_MS", self.attendance_timeout),
            ("MATCHER_PROBE_RETRY_SEC", self.matcher_probe_retry),
        ];
        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }

        if self.matcher_urls.is_empty() {
            return Err(Error::Config("MATCHER_URLS lists no provider".to_string()));
        }

        if self.capture_fps == 0 {
            return Err(Error::Config("CAPTURE_FPS must be greater than zero".to_string()));
        }

        if let Some(threshold) = self.dedup.threshold {
            if !threshold.value().is_finite() {
                return Err(Error::Config(format!(
                    "score threshold must be finite, got {}",
                    threshold.value()
                )));
            }
        }

        Ok(())
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} = {:?}: {}", key, raw, e))),
        _ => Ok(None),
    }
}
