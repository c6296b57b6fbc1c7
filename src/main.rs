//! Attendance Camserver
//!
//! Main entry point for the camera attendance service.

use attendance_camserver::{
    attendance_reporter::HttpAttendanceReporter,
    camera_registry::{CameraSource, FileCameraSource, SqlCameraRepository},
    camera_worker::WorkerContext,
    capture::{CaptureLeaseManager, FfmpegCapture, FfmpegSettings},
    config::AppConfig,
    dedup_service::Deduper,
    face_matcher::{wait_for_provider, FaceMatcher, HttpFaceMatcher},
    reconciler::Reconciler,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Desired camera set: the database when configured, else the JSON file
async fn build_camera_source(config: &AppConfig) -> anyhow::Result<Arc<dyn CameraSource>> {
    match &config.database_url {
        Some(url) => {
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connected");
            Ok(Arc::new(SqlCameraRepository::new(pool)))
        }
        None => Ok(Arc::new(FileCameraSource::new(config.cameras_file.clone()))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_camserver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Attendance Camserver v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    tracing::info!(
        cameras_file = %config.cameras_file.display(),
        database = config.database_url.is_some(),
        matchers = config.matcher_urls.len(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let source = build_camera_source(&config).await?;
    tracing::info!(source = %source.describe(), "Camera source ready");

    // One open handle per capture source
    let leases = Arc::new(CaptureLeaseManager::with_timeout(config.capture_lease_wait));
    let opener = Arc::new(FfmpegCapture::new(
        FfmpegSettings {
            binary: config.ffmpeg_bin.clone(),
            fps: config.capture_fps,
            open_timeout: config.worker.frame_read_timeout,
        },
        leases,
    ));

    let providers = config
        .matcher_urls
        .iter()
        .map(|url| {
            HttpFaceMatcher::new(url.as_str(), config.matcher_timeout)
                .map(|m| Arc::new(m) as Arc<dyn FaceMatcher>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut matcher_shutdown = shutdown_rx.clone();
    let Some(matcher) =
        wait_for_provider(&providers, config.matcher_probe_retry, &mut matcher_shutdown).await
    else {
        tracing::info!("Shutdown before a face matcher became available");
        return Ok(());
    };

    let sink = Arc::new(HttpAttendanceReporter::new(
        config.attendance_url.clone(),
        config.attendance_timeout,
    )?);
    let deduper = Arc::new(Deduper::new(config.dedup.clone()));

    let policy = deduper.policy();
    tracing::info!(
        matcher = %matcher.name(),
        attendance_url = %sink.url(),
        attendance_timeout_ms = sink.timeout().as_millis() as u64,
        same_camera_cooldown_sec = policy.same_camera_cooldown.as_secs(),
        cross_camera_cooldown_sec = policy.cross_camera_cooldown.as_secs(),
        threshold = ?policy.threshold,
        "Attendance pipeline ready"
    );

    let ctx = Arc::new(WorkerContext::new(
        opener,
        matcher,
        deduper,
        sink,
        config.worker.clone(),
    ));

    let reconciler = Reconciler::new(source, ctx, config.reconciler.clone());
    reconciler.run(shutdown_rx).await;

    tracing::info!("Attendance Camserver stopped");
    Ok(())
}
