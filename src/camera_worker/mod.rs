//! CameraWorker - Per-camera capture/process loop
//!
//! ## State machine
//!
//! ```text
//! Connecting --open ok--> Streaming --read failure--> Reconnecting --backoff--> Connecting
//!     |  ^                    |                            |
//!     +--+ open failure,      +---------- cancel ----------+----> Stopped
//!          connect backoff
//! ```
//!
//! Cancellation is checked before every open, wakes every backoff sleep and
//! is checked again after each frame read/process cycle. Processing of a
//! frame that is already in flight is never interrupted.
//!
//! A worker holds at most one capture stream and always releases it itself
//! before leaving `Streaming`.

mod state;

pub use state::{WorkerState, WorkerStats, WorkerStatsSnapshot};

use crate::attendance_reporter::AttendanceSink;
use crate::camera_registry::CameraDescriptor;
use crate::capture::{CaptureOpener, Frame, FrameStream};
use crate::config::WorkerConfig;
use crate::dedup_service::Deduper;
use crate::face_matcher::FaceMatcher;
use crate::models::Sighting;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every worker
pub struct WorkerContext {
    pub opener: Arc<dyn CaptureOpener>,
    pub matcher: Arc<dyn FaceMatcher>,
    pub deduper: Arc<Deduper>,
    pub sink: Arc<dyn AttendanceSink>,
    pub config: WorkerConfig,
}

impl WorkerContext {
    pub fn new(
        opener: Arc<dyn CaptureOpener>,
        matcher: Arc<dyn FaceMatcher>,
        deduper: Arc<Deduper>,
        sink: Arc<dyn AttendanceSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            opener,
            matcher,
            deduper,
            sink,
            config,
        }
    }
}

enum Phase {
    Connecting,
    Streaming(Box<dyn FrameStream>),
    Reconnecting,
    Stopped,
}

/// Resolves once the flag is set or its sender went away
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// One camera's loop
pub struct CameraWorker {
    camera: CameraDescriptor,
    ctx: Arc<WorkerContext>,
    cancel: watch::Receiver<bool>,
    state_tx: watch::Sender<WorkerState>,
    stats: Arc<WorkerStats>,
}

impl CameraWorker {
    /// The worker only ever sees the cancellation receiver, never its handle
    pub fn new(
        camera: CameraDescriptor,
        ctx: Arc<WorkerContext>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Connecting);
        Self {
            camera,
            ctx,
            cancel,
            state_tx,
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// Published state
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run until cancelled
    pub async fn run(mut self) {
        info!(
            camera_id = %self.camera.id,
            camera_name = %self.camera.display_name,
            source = %self.camera.source,
            "Camera worker started"
        );

        let mut phase = Phase::Connecting;
        loop {
            phase = match phase {
                Phase::Connecting => self.connect().await,
                Phase::Streaming(stream) => self.stream(stream).await,
                Phase::Reconnecting => self.reconnect().await,
                Phase::Stopped => break,
            };
        }

        self.set_state(WorkerState::Stopped);
        let stats = self.stats.snapshot();
        info!(
            camera_id = %self.camera.id,
            frames_read = stats.frames_read,
            sightings_reported = stats.sightings_reported,
            "Camera worker stopped"
        );
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    /// `false` when cancellation cut the sleep short
    async fn sleep_or_cancel(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancelled(&mut self.cancel) => false,
        }
    }

    fn set_state(&self, next: WorkerState) {
        let prev = self.state_tx.send_replace(next);
        if prev == next {
            return;
        }

        match (prev, next) {
            (WorkerState::Streaming, WorkerState::Reconnecting) => {
                warn!(camera_id = %self.camera.id, "Camera stream lost");
            }
            (WorkerState::Connecting, WorkerState::Streaming)
                if self.stats.snapshot().reconnects > 0 =>
            {
                info!(camera_id = %self.camera.id, "Camera stream recovered");
            }
            _ => {
                debug!(
                    camera_id = %self.camera.id,
                    from = %prev,
                    to = %next,
                    "Worker state changed"
                );
            }
        }
    }

    async fn connect(&mut self) -> Phase {
        self.set_state(WorkerState::Connecting);
        if self.is_cancelled() {
            return Phase::Stopped;
        }

        match self.ctx.opener.open(&self.camera).await {
            Ok(stream) => {
                info!(
                    camera_id = %self.camera.id,
                    camera_name = %self.camera.display_name,
                    "Camera connected"
                );
                Phase::Streaming(stream)
            }
            Err(e) => {
                self.stats.connect_failed();
                let backoff = self.ctx.config.connect_backoff;
                if e.is_transient() {
                    warn!(
                        camera_id = %self.camera.id,
                        error = %e,
                        retry_in_sec = backoff.as_secs(),
                        "Camera open failed"
                    );
                } else {
                    error!(
                        camera_id = %self.camera.id,
                        error = %e,
                        retry_in_sec = backoff.as_secs(),
                        "Camera open failed"
                    );
                }

                if self.sleep_or_cancel(backoff).await {
                    Phase::Connecting
                } else {
                    Phase::Stopped
                }
            }
        }
    }

    async fn stream(&mut self, mut stream: Box<dyn FrameStream>) -> Phase {
        self.set_state(WorkerState::Streaming);
        let read_timeout = self.ctx.config.frame_read_timeout;
        let frame_interval = self.ctx.config.frame_interval;

        loop {
            if self.is_cancelled() {
                stream.release().await;
                return Phase::Stopped;
            }

            let read = tokio::select! {
                r = timeout(read_timeout, stream.read_frame()) => Some(r),
                _ = cancelled(&mut self.cancel) => None,
            };

            let failure = match read {
                None => {
                    stream.release().await;
                    return Phase::Stopped;
                }
                Some(Ok(Ok(frame))) => {
                    self.stats.frame_read();
                    self.process_frame(&frame).await;
                    None
                }
                Some(Ok(Err(e))) => Some(e.to_string()),
                Some(Err(_)) => Some(format!(
                    "no frame within {}s",
                    read_timeout.as_secs()
                )),
            };

            if let Some(reason) = failure {
                warn!(
                    camera_id = %self.camera.id,
                    error = %reason,
                    "Frame read failed"
                );
                stream.release().await;
                return Phase::Reconnecting;
            }

            if !frame_interval.is_zero() && !self.sleep_or_cancel(frame_interval).await {
                stream.release().await;
                return Phase::Stopped;
            }
        }
    }

    async fn reconnect(&mut self) -> Phase {
        self.set_state(WorkerState::Reconnecting);
        self.stats.reconnected();

        if self.sleep_or_cancel(self.ctx.config.read_failure_backoff).await {
            Phase::Connecting
        } else {
            Phase::Stopped
        }
    }

    async fn process_frame(&self, frame: &Frame) {
        let matcher_timeout = self.ctx.config.matcher_timeout;
        let call = AssertUnwindSafe(self.ctx.matcher.match_faces(frame)).catch_unwind();
        let faces = match timeout(matcher_timeout, call).await {
            Ok(Ok(Ok(faces))) => faces,
            Ok(Ok(Err(e))) => {
                self.stats.frame_skipped();
                error!(
                    camera_id = %self.camera.id,
                    seq = frame.seq,
                    error = %e,
                    "Matcher failed, frame skipped"
                );
                return;
            }
            Ok(Err(panic)) => {
                self.stats.frame_skipped();
                error!(
                    camera_id = %self.camera.id,
                    seq = frame.seq,
                    error = %panic_message(panic.as_ref()),
                    "Matcher panicked, frame skipped"
                );
                return;
            }
            Err(_) => {
                self.stats.frame_skipped();
                warn!(
                    camera_id = %self.camera.id,
                    seq = frame.seq,
                    timeout_ms = matcher_timeout.as_millis() as u64,
                    "Matcher timed out, frame skipped"
                );
                return;
            }
        };

        // Per-camera cooldowns key on the display name, so cameras sharing a
        // name share one guard.
        let camera_name = &self.camera.display_name;
        for face in faces {
            if !face.is_known() {
                continue;
            }

            // Check and record are separate so the lock is never held across
            // the sink call; two cameras racing on one identity may both report.
            if !self
                .ctx
                .deduper
                .should_count(&face.identity, camera_name, face.score)
                .await
            {
                continue;
            }

            let sighting = Sighting::new(
                face.identity.as_str(),
                self.camera.id.clone(),
                camera_name.as_str(),
                face.score,
            );

            if self.ctx.sink.report(&sighting).await {
                // Cooldown only advances once the sink acknowledged
                self.ctx.deduper.record_seen(&face.identity, camera_name).await;
                self.stats.sighting_reported();
            } else {
                self.stats.report_failed();
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
