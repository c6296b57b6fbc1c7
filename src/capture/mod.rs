//! Capture - Frame acquisition from camera sources
//!
//! ## Responsibilities
//!
//! - Open a capture source for one camera (`CaptureOpener`)
//! - Read frames one at a time in capture order (`FrameStream`)
//! - Allow only one open handle per physical source (`CaptureLeaseManager`)
//!
//! The production opener runs ffmpeg as a child process and cuts its
//! MJPEG output into frames, so reads never block the runtime.

mod ffmpeg;
mod jpeg;
mod lease;

pub use ffmpeg::{FfmpegCapture, FfmpegSettings};
pub use jpeg::JpegSplitter;
pub use lease::{CaptureLease, CaptureLeaseManager};

use crate::camera_registry::CameraDescriptor;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One decoded-later frame (JPEG bytes)
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number within the current capture session
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        Self {
            seq,
            captured_at: Utc::now(),
            data,
        }
    }
}

/// An open capture handle
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame; an error means the stream is unusable
    async fn read_frame(&mut self) -> Result<Frame>;

    /// Close the handle and give the source back
    async fn release(self: Box<Self>);
}

/// Opens capture handles for cameras
#[async_trait]
pub trait CaptureOpener: Send + Sync {
    async fn open(&self, camera: &CameraDescriptor) -> Result<Box<dyn FrameStream>>;
}
