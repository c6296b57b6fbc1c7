//! End-to-end pipeline tests
//!
//! Real HTTP matcher and attendance clients against in-process axum
//! services, a JSON camera file, and scripted capture streams.

use async_trait::async_trait;
use attendance_camserver::{
    attendance_reporter::HttpAttendanceReporter,
    camera_registry::{CameraDescriptor, CameraId, FileCameraSource},
    camera_worker::WorkerContext,
    capture::{CaptureOpener, Frame, FrameStream},
    config::{ReconcilerConfig, WorkerConfig},
    dedup_service::{DedupPolicy, Deduper},
    face_matcher::{select_provider, FaceMatcher, HttpFaceMatcher},
    reconciler::Reconciler,
    Result,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct LoopStream;

#[async_trait]
impl FrameStream for LoopStream {
    async fn read_frame(&mut self) -> Result<Frame> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Frame::new(0, vec![0xFF, 0xD8, 0xFF, 0xD9]))
    }

    async fn release(self: Box<Self>) {}
}

#[derive(Default)]
struct LoopOpener {
    opens: AtomicUsize,
}

#[async_trait]
impl CaptureOpener for LoopOpener {
    async fn open(&self, _camera: &CameraDescriptor) -> Result<Box<dyn FrameStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopStream))
    }
}

#[derive(Default)]
struct Sink {
    failing: AtomicBool,
    attempts: AtomicUsize,
    marked: Mutex<Vec<serde_json::Value>>,
}

async fn mark(State(sink): State<Arc<Sink>>, Json(body): Json<serde_json::Value>) -> StatusCode {
    sink.attempts.fetch_add(1, Ordering::SeqCst);
    if sink.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    sink.marked.lock().await.push(body);
    StatusCode::CREATED
}

async fn recognize() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "faces": [
            {"box": [0, 0, 50, 50], "label": "unknown", "score": 0.3},
            {"box": [60, 0, 110, 50], "label": "21CS042", "score": 0.82}
        ]
    }))
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_cameras(json: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("cameras-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, json).unwrap();
    path
}

struct Pipeline {
    reconciler: Reconciler,
    sink: Arc<Sink>,
    opener: Arc<LoopOpener>,
    cameras_file: PathBuf,
}

async fn pipeline(cameras_json: &str) -> Pipeline {
    let recognizer = serve(
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/v1/recognize", post(recognize)),
    )
    .await;

    let sink = Arc::new(Sink::default());
    let sink_url = serve(
        Router::new()
            .route("/attendance/mark", post(mark))
            .with_state(sink.clone()),
    )
    .await;

    // first provider is down, second one is picked
    let providers: Vec<Arc<dyn FaceMatcher>> = vec![
        Arc::new(HttpFaceMatcher::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap()),
        Arc::new(HttpFaceMatcher::new(recognizer, Duration::from_secs(2)).unwrap()),
    ];
    let matcher = select_provider(&providers).await.expect("no matcher selected");

    let reporter = HttpAttendanceReporter::new(
        format!("{}/attendance/mark", sink_url),
        Duration::from_secs(2),
    )
    .unwrap();

    let opener = Arc::new(LoopOpener::default());
    let ctx = Arc::new(WorkerContext::new(
        opener.clone(),
        matcher,
        Arc::new(Deduper::new(DedupPolicy::default())),
        Arc::new(reporter),
        WorkerConfig {
            frame_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        },
    ));

    let cameras_file = write_cameras(cameras_json);
    let source = Arc::new(FileCameraSource::new(cameras_file.clone()));
    let reconciler = Reconciler::new(source, ctx, ReconcilerConfig::default());

    Pipeline {
        reconciler,
        sink,
        opener,
        cameras_file,
    }
}

#[tokio::test]
async fn test_same_person_on_two_cameras_is_marked_once() {
    let mut p = pipeline(r#"[{"id": 1, "name": "Gate", "source": "rtsp://10.0.0.5/live"}]"#).await;

    let report = p.reconciler.tick().await;
    assert_eq!(report.started.len(), 1);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(p.sink.marked.lock().await.len(), 1);

    // the same student walks past a second camera right after
    std::fs::write(
        &p.cameras_file,
        r#"[
            {"id": 1, "name": "Gate", "source": "rtsp://10.0.0.5/live"},
            {"id": 2, "name": "Lab", "source": 0}
        ]"#,
    )
    .unwrap();
    let report = p.reconciler.tick().await;
    assert_eq!(report.started, vec![CameraId::from(2)]);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let marked = p.sink.marked.lock().await.clone();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0]["identity"], "21CS042");
    assert_eq!(marked[0]["camera_name"], "Gate");
    assert_eq!(p.sink.attempts.load(Ordering::SeqCst), 1);

    let status = p.reconciler.status();
    assert!(status[&CameraId::from(2)].stats.frames_read > 0);
    assert_eq!(status[&CameraId::from(2)].stats.sightings_reported, 0);

    p.reconciler.shutdown_all().await;
    std::fs::remove_file(&p.cameras_file).ok();
}

#[tokio::test]
async fn test_failed_reports_retry_until_sink_recovers() {
    let mut p = pipeline(r#"[{"id": 7, "name": "Library", "source": 1}]"#).await;
    p.sink.failing.store(true, Ordering::SeqCst);

    p.reconciler.tick().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(p.sink.attempts.load(Ordering::SeqCst) > 1);
    assert!(p.sink.marked.lock().await.is_empty());

    p.sink.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let marked = p.sink.marked.lock().await.clone();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0]["camera_name"], "Library");

    let stats = p.reconciler.status()[&CameraId::from(7)].stats;
    assert_eq!(stats.sightings_reported, 1);
    assert!(stats.report_failures >= 1);

    p.reconciler.shutdown_all().await;
    std::fs::remove_file(&p.cameras_file).ok();
}

#[tokio::test]
async fn test_cameras_file_edits_drive_workers() {
    let mut p = pipeline(r#"[{"id": 1, "name": "Gate", "source": 0}]"#).await;

    p.reconciler.tick().await;
    assert_eq!(p.reconciler.running_ids().len(), 1);

    std::fs::write(
        &p.cameras_file,
        r#"[
            {"id": 1, "name": "Gate", "source": 0, "active": false},
            {"id": 2, "name": "Lab", "source": 1}
        ]"#,
    )
    .unwrap();
    let report = p.reconciler.tick().await;
    assert_eq!(report.started, vec![CameraId::from(2)]);
    assert_eq!(report.stopped, vec![CameraId::from(1)]);

    // unreadable file keeps the current workers
    std::fs::write(&p.cameras_file, "not json").unwrap();
    let report = p.reconciler.tick().await;
    assert!(report.listing_failed);
    assert_eq!(p.reconciler.running_ids().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(p.opener.opens.load(Ordering::SeqCst), 2);

    p.reconciler.shutdown_all().await;
    std::fs::remove_file(&p.cameras_file).ok();
}
