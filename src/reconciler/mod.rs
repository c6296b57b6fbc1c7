//! Reconciler - Keeps running workers equal to the desired camera set
//!
//! ## Responsibilities
//!
//! - Poll the camera source on a fixed interval
//! - Start workers for added cameras, stop workers for removed ones
//! - Own every `WorkerHandle`; nothing outside this module sees them
//!
//! ## Failure policy
//!
//! A failed listing leaves the running set untouched for that tick.
//! Stopping is best-effort with a bounded wait: a worker that misses the
//! deadline is discarded and finishes on its own.

use crate::camera_registry::{normalize_listing, CameraDescriptor, CameraId, CameraSource};
use crate::camera_worker::{
    cancelled, CameraWorker, WorkerContext, WorkerState, WorkerStats, WorkerStatsSnapshot,
};
use crate::config::ReconcilerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Reconciler-owned handle to one running worker
struct WorkerHandle {
    descriptor: CameraDescriptor,
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    state_rx: watch::Receiver<WorkerState>,
    stats: Arc<WorkerStats>,
    started_at: DateTime<Utc>,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<CameraId>,
    /// Every worker removed this tick, including the ones in `timed_out`
    pub stopped: Vec<CameraId>,
    /// Removed workers that had not finished by the stop deadline
    pub timed_out: Vec<CameraId>,
    pub running: usize,
    pub listing_failed: bool,
}

/// Per-worker status view
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub display_name: String,
    pub running: bool,
    pub state: WorkerState,
    pub stats: WorkerStatsSnapshot,
    pub started_at: DateTime<Utc>,
}

/// Worker set controller
pub struct Reconciler {
    source: Arc<dyn CameraSource>,
    ctx: Arc<WorkerContext>,
    config: ReconcilerConfig,
    workers: HashMap<CameraId, WorkerHandle>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn CameraSource>,
        ctx: Arc<WorkerContext>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            ctx,
            config,
            workers: HashMap::new(),
        }
    }

    /// Tick until `shutdown` flips, then stop every worker
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.source.describe(),
            poll_interval_sec = self.config.poll_interval.as_secs(),
            "Reconciler started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = cancelled(&mut shutdown) => break,
            }
        }

        self.shutdown_all().await;
        info!("Reconciler stopped");
    }

    /// One reconciliation pass
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.reap_finished().await;

        let listing = match self.source.list_active_cameras().await {
            Ok(listing) => normalize_listing(listing),
            Err(e) => {
                error!(
                    source = %self.source.describe(),
                    error = %e,
                    running = self.workers.len(),
                    "Camera listing failed, keeping current workers"
                );
                report.listing_failed = true;
                report.running = self.workers.len();
                return report;
            }
        };

        let desired: BTreeSet<CameraId> = listing.iter().map(|c| c.id.clone()).collect();

        for descriptor in listing {
            if !self.workers.contains_key(&descriptor.id) {
                let id = descriptor.id.clone();
                self.start(descriptor);
                report.started.push(id);
            }
        }

        let removed: Vec<CameraId> = self
            .running_ids()
            .into_iter()
            .filter(|id| !desired.contains(id))
            .collect();
        if !removed.is_empty() {
            let (stopped, timed_out) = self.stop_workers(removed).await;
            report.stopped = stopped;
            report.timed_out = timed_out;
        }

        let pruned = self.ctx.deduper.prune_stale().await;
        if pruned > 0 {
            let (per_camera, global) = self.ctx.deduper.tracked().await;
            debug!(
                pruned,
                per_camera,
                global,
                "Stale cooldown entries pruned"
            );
        }

        report.running = self.workers.len();
        info!(
            running = report.running,
            started = report.started.len(),
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            "Reconcile tick complete"
        );
        report
    }

    /// Start a worker; `false` when one already runs for this id
    pub fn start(&mut self, descriptor: CameraDescriptor) -> bool {
        if self.workers.contains_key(&descriptor.id) {
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker = CameraWorker::new(descriptor.clone(), self.ctx.clone(), cancel_rx);
        let state_rx = worker.subscribe_state();
        let stats = worker.stats();
        let join = tokio::spawn(worker.run());

        info!(
            camera_id = %descriptor.id,
            camera_name = %descriptor.display_name,
            "Worker started"
        );

        self.workers.insert(
            descriptor.id.clone(),
            WorkerHandle {
                descriptor,
                cancel_tx,
                join,
                state_rx,
                stats,
                started_at: Utc::now(),
            },
        );
        true
    }

    /// Stop one worker
    ///
    /// `None` if nothing runs for `id`, otherwise whether it finished
    /// before the stop timeout. The handle is discarded either way.
    pub async fn stop(&mut self, id: &CameraId) -> Option<bool> {
        if !self.workers.contains_key(id) {
            return None;
        }
        let (_, timed_out) = self.stop_workers(vec![id.clone()]).await;
        Some(timed_out.is_empty())
    }

    /// Stop every worker against one shared deadline
    pub async fn shutdown_all(&mut self) {
        let ids: Vec<CameraId> = self.running_ids().into_iter().collect();
        if ids.is_empty() {
            return;
        }

        info!(workers = ids.len(), "Stopping all workers");
        let (stopped, timed_out) = self.stop_workers(ids).await;
        info!(
            stopped = stopped.len(),
            timed_out = timed_out.len(),
            "All workers signalled"
        );
    }

    pub fn status(&self) -> BTreeMap<CameraId, WorkerStatus> {
        self.workers
            .iter()
            .map(|(id, handle)| {
                (
                    id.clone(),
                    WorkerStatus {
                        display_name: handle.descriptor.display_name.clone(),
                        running: !handle.join.is_finished(),
                        state: *handle.state_rx.borrow(),
                        stats: handle.stats.snapshot(),
                        started_at: handle.started_at,
                    },
                )
            })
            .collect()
    }

    pub fn running_ids(&self) -> BTreeSet<CameraId> {
        self.workers.keys().cloned().collect()
    }

    /// Signal all first, then join each until the shared deadline
    async fn stop_workers(&mut self, ids: Vec<CameraId>) -> (Vec<CameraId>, Vec<CameraId>) {
        let handles: Vec<WorkerHandle> = ids
            .iter()
            .filter_map(|id| self.workers.remove(id))
            .collect();

        for handle in &handles {
            // Err only if the worker already dropped its receiver
            let _ = handle.cancel_tx.send(true);
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        let mut stopped = Vec::with_capacity(handles.len());
        let mut timed_out = Vec::new();

        for handle in handles {
            let id = handle.descriptor.id.clone();
            match timeout_at(deadline, handle.join).await {
                Ok(Ok(())) => {
                    info!(camera_id = %id, "Worker stopped");
                }
                Ok(Err(e)) => {
                    error!(camera_id = %id, error = %e, "Worker ended abnormally");
                }
                Err(_) => {
                    warn!(
                        camera_id = %id,
                        timeout_sec = self.config.stop_timeout.as_secs(),
                        "Worker did not stop in time, discarding handle"
                    );
                    timed_out.push(id.clone());
                }
            }
            stopped.push(id);
        }

        (stopped, timed_out)
    }

    /// Drop handles of workers whose task already ended
    async fn reap_finished(&mut self) {
        let finished: Vec<CameraId> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for id in finished {
            if let Some(handle) = self.workers.remove(&id) {
                match handle.join.await {
                    Ok(()) => warn!(camera_id = %id, "Worker exited on its own"),
                    Err(e) => error!(camera_id = %id, error = %e, "Worker crashed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance_reporter::AttendanceSink;
    use crate::capture::{CaptureOpener, Frame, FrameStream};
    use crate::config::WorkerConfig;
    use crate::dedup_service::{DedupPolicy, Deduper};
    use crate::error::{Error, Result};
    use crate::face_matcher::{FaceMatch, FaceMatcher};
    use crate::models::Sighting;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        listing: Mutex<Option<Vec<CameraDescriptor>>>,
    }

    impl FakeSource {
        async fn set(&self, ids: &[&str]) {
            let cameras = ids
                .iter()
                .map(|id| CameraDescriptor::new(*id, format!("Camera {}", id), id))
                .collect();
            *self.listing.lock().await = Some(cameras);
        }

        async fn fail(&self) {
            *self.listing.lock().await = None;
        }
    }

    #[async_trait]
    impl CameraSource for FakeSource {
        async fn list_active_cameras(&self) -> Result<Vec<CameraDescriptor>> {
            self.listing
                .lock()
                .await
                .clone()
                .ok_or_else(|| Error::Internal("camera store unreachable".to_string()))
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    struct IdleStream {
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameStream for IdleStream {
        async fn read_frame(&mut self) -> Result<Frame> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Frame::new(0, Vec::new()))
        }

        async fn release(self: Box<Self>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeOpener {
        opens: AtomicUsize,
        released: Arc<AtomicUsize>,
        /// open never returns
        hang: bool,
        /// first open panics
        panic_once: bool,
    }

    #[async_trait]
    impl CaptureOpener for FakeOpener {
        async fn open(&self, _camera: &CameraDescriptor) -> Result<Box<dyn FrameStream>> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if self.panic_once && n == 0 {
                panic!("capture backend crashed");
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(Box::new(IdleStream {
                released: self.released.clone(),
            }))
        }
    }

    struct NoFaces;

    #[async_trait]
    impl FaceMatcher for NoFaces {
        fn name(&self) -> &str {
            "none"
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }

        async fn match_faces(&self, _frame: &Frame) -> Result<Vec<FaceMatch>> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl AttendanceSink for NullSink {
        async fn report(&self, _sighting: &Sighting) -> bool {
            true
        }
    }

    fn reconciler(opener: FakeOpener) -> (Reconciler, Arc<FakeSource>, Arc<FakeOpener>, Arc<Deduper>) {
        let source = Arc::new(FakeSource::default());
        let opener = Arc::new(opener);
        let deduper = Arc::new(Deduper::new(DedupPolicy::default()));
        let ctx = Arc::new(WorkerContext::new(
            opener.clone(),
            Arc::new(NoFaces),
            deduper.clone(),
            Arc::new(NullSink),
            WorkerConfig::default(),
        ));
        let reconciler = Reconciler::new(source.clone(), ctx, ReconcilerConfig::default());
        (reconciler, source, opener, deduper)
    }

    fn ids(values: &[&str]) -> BTreeSet<CameraId> {
        values.iter().map(|v| CameraId::from(*v)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_starts_added_cameras() {
        let (mut reconciler, source, _, _) = reconciler(FakeOpener::default());

        source.set(&["1"]).await;
        let report = reconciler.tick().await;
        assert_eq!(report.started, vec![CameraId::from("1")]);
        assert_eq!(reconciler.running_ids(), ids(&["1"]));

        source.set(&["1", "2"]).await;
        let report = reconciler.tick().await;
        assert_eq!(report.started, vec![CameraId::from("2")]);
        assert_eq!(report.running, 2);
        assert_eq!(reconciler.running_ids(), ids(&["1", "2"]));

        reconciler.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_stops_removed_cameras() {
        let (mut reconciler, source, opener, _) = reconciler(FakeOpener::default());

        source.set(&["1", "2"]).await;
        reconciler.tick().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        source.set(&[]).await;
        let report = reconciler.tick().await;
        assert_eq!(report.stopped.len(), 2);
        assert!(report.timed_out.is_empty());
        assert!(reconciler.running_ids().is_empty());
        assert!(reconciler.status().is_empty());
        assert_eq!(opener.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_keeps_running_set() {
        let (mut reconciler, source, _, _) = reconciler(FakeOpener::default());

        source.set(&["1", "2"]).await;
        reconciler.tick().await;

        source.fail().await;
        let report = reconciler.tick().await;
        assert!(report.listing_failed);
        assert_eq!(report.running, 2);
        assert!(report.stopped.is_empty());
        assert_eq!(reconciler.running_ids(), ids(&["1", "2"]));

        reconciler.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_discarded_after_timeout() {
        let (mut reconciler, source, _, _) = reconciler(FakeOpener {
            hang: true,
            ..FakeOpener::default()
        });

        source.set(&["1"]).await;
        reconciler.tick().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        assert_eq!(reconciler.stop(&CameraId::from("1")).await, Some(false));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
        assert!(reconciler.running_ids().is_empty());
        assert_eq!(reconciler.stop(&CameraId::from("1")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_worker_is_restarted() {
        let (mut reconciler, source, opener, _) = reconciler(FakeOpener {
            panic_once: true,
            ..FakeOpener::default()
        });

        source.set(&["1"]).await;
        reconciler.tick().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!reconciler.status()[&CameraId::from("1")].running);

        let report = reconciler.tick().await;
        assert_eq!(report.started, vec![CameraId::from("1")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);

        reconciler.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_change_does_not_restart() {
        let (mut reconciler, source, opener, _) = reconciler(FakeOpener::default());

        source.set(&["1"]).await;
        reconciler.tick().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        *source.listing.lock().await =
            Some(vec![CameraDescriptor::new("1", "Renamed", "rtsp://10.0.0.7/live")]);
        let report = reconciler.tick().await;
        assert!(report.started.is_empty());
        assert!(report.stopped.is_empty());

        let status = reconciler.status();
        let worker = &status[&CameraId::from("1")];
        assert_eq!(worker.display_name, "Camera 1");
        assert_eq!(worker.state, WorkerState::Streaming);
        assert!(worker.running);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        reconciler.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_prunes_stale_cooldowns() {
        let (mut reconciler, source, _, deduper) = reconciler(FakeOpener::default());
        source.set(&[]).await;

        deduper.record_seen("21CS042", "Gate").await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        reconciler.tick().await;
        assert_eq!(deduper.tracked().await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_all_workers_on_shutdown() {
        let (reconciler, source, opener, _) = reconciler(FakeOpener::default());
        source.set(&["1", "2", "3"]).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reconciler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(11), task)
            .await
            .expect("reconciler did not stop")
            .unwrap();
        assert_eq!(opener.released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repolls_on_interval() {
        let (reconciler, source, opener, _) = reconciler(FakeOpener::default());
        source.set(&["1"]).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reconciler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        // picked up on the next 30s poll, not before
        source.set(&["1", "2"]).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);

        source.set(&["2"]).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(opener.released.load(Ordering::SeqCst), 1);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(11), task)
            .await
            .expect("reconciler did not stop")
            .unwrap();
        assert_eq!(opener.released.load(Ordering::SeqCst), 2);
    }
}
