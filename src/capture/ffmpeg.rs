//! ffmpeg-backed capture
//!
//! One long-running ffmpeg child per open stream, writing MJPEG to stdout.
//! `kill_on_drop(true)` makes sure no ffmpeg process outlives its handle,
//! even when a worker future is dropped mid-read.

use super::jpeg::JpegSplitter;
use super::lease::{CaptureLease, CaptureLeaseManager};
use super::{CaptureOpener, Frame, FrameStream};
use crate::camera_registry::{CameraDescriptor, CameraId, CaptureSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// Read buffer size for the ffmpeg pipe
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub binary: String,
    pub fps: u32,
    /// How long the first frame may take before the open counts as failed
    pub open_timeout: Duration,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            fps: 10,
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens cameras through ffmpeg
pub struct FfmpegCapture {
    settings: FfmpegSettings,
    leases: Arc<CaptureLeaseManager>,
}

impl FfmpegCapture {
    pub fn new(settings: FfmpegSettings, leases: Arc<CaptureLeaseManager>) -> Self {
        Self { settings, leases }
    }

    /// ffmpeg arguments for a source
    fn build_args(source: &CaptureSource, fps: u32) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        match source {
            CaptureSource::Device(index) => {
                args.extend(["-f", "v4l2", "-i"].map(String::from));
                args.push(format!("/dev/video{}", index));
            }
            CaptureSource::Url(url) => {
                if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
                    args.extend(["-rtsp_transport", "tcp"].map(String::from));
                } else if !url.contains("://") {
                    // local file: play at native rate instead of as fast as possible
                    args.push("-re".to_string());
                }
                args.push("-i".to_string());
                args.push(url.clone());
            }
        }

        args.extend(
            [
                "-an",
                "-vf",
                &format!("fps={}", fps),
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-q:v",
                "5",
                "-loglevel",
                "error",
                "-",
            ]
            .map(String::from),
        );
        args
    }
}

#[async_trait]
impl CaptureOpener for FfmpegCapture {
    async fn open(&self, camera: &CameraDescriptor) -> Result<Box<dyn FrameStream>> {
        let lease = self.leases.acquire(&camera.source.lease_key()).await?;

        let mut child = Command::new(&self.settings.binary)
            .args(Self::build_args(&camera.source, self.settings.fps))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::capture(&camera.id, format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::capture(&camera.id, "ffmpeg stdout not captured"))?;

        let mut stream = FfmpegStream {
            camera_id: camera.id.clone(),
            child,
            stdout,
            splitter: JpegSplitter::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
            seq: 0,
            pending: None,
            _lease: lease,
        };

        // The source only counts as opened once it delivers a frame
        match tokio::time::timeout(self.settings.open_timeout, stream.pull_frame()).await {
            Ok(Ok(first)) => {
                stream.pending = Some(first);
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => {
                Box::new(stream).release().await;
                Err(e)
            }
            Err(_) => {
                Box::new(stream).release().await;
                Err(Error::capture(
                    &camera.id,
                    format!(
                        "no frame within {}s of opening",
                        self.settings.open_timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

/// Open ffmpeg capture session
struct FfmpegStream {
    camera_id: CameraId,
    child: Child,
    stdout: ChildStdout,
    splitter: JpegSplitter,
    chunk: Vec<u8>,
    seq: u64,
    /// First frame read while confirming the open
    pending: Option<Frame>,
    _lease: CaptureLease,
}

impl FfmpegStream {
    async fn pull_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(data) = self.splitter.next_frame() {
                self.seq += 1;
                return Ok(Frame::new(self.seq, data));
            }

            let n = self
                .stdout
                .read(&mut self.chunk)
                .await
                .map_err(|e| Error::capture(&self.camera_id, format!("pipe read: {}", e)))?;
            if n == 0 {
                return Err(Error::capture(&self.camera_id, "ffmpeg stream ended"));
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn read_frame(&mut self) -> Result<Frame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.pull_frame().await
    }

    async fn release(mut self: Box<Self>) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(
                camera_id = %self.camera_id,
                error = %e,
                "ffmpeg already exited"
            );
        }
        tracing::debug!(
            camera_id = %self.camera_id,
            frames = self.seq,
            "Capture released"
        );
    }
}
