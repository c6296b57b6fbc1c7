//! CameraRegistry types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque camera identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CameraId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Local capture device index (e.g. /dev/video0)
    Device(u32),
    /// Network or file source (rtsp://, http://, path)
    Url(String),
}

impl CaptureSource {
    /// Interpret a stored connection string; all-digit values are device indexes
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u32>() {
            Ok(index) if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) => {
                CaptureSource::Device(index)
            }
            _ => CaptureSource::Url(trimmed.to_string()),
        }
    }

    /// Key used to serialize access to the same physical source
    pub fn lease_key(&self) -> String {
        match self {
            CaptureSource::Device(index) => format!("device:{}", index),
            CaptureSource::Url(url) => url.clone(),
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Device(index) => write!(f, "device {}", index),
            // never log credentials embedded in the URL
            CaptureSource::Url(url) => f.write_str(&redact_credentials(url)),
        }
    }
}

/// Desired camera, re-read every reconciliation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub display_name: String,
    pub source: CaptureSource,
    pub active: bool,
}

impl CameraDescriptor {
    pub fn new(id: impl Into<CameraId>, display_name: impl Into<String>, source: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            source: CaptureSource::parse(source),
            active: true,
        }
    }
}

/// Strip `user:pass@` from a URL for logging
pub fn redact_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}
