//! Error handling for the attendance camserver

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// SQLx database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Capture open/read error
    #[error("Capture error for camera {camera_id}: {message}")]
    Capture { camera_id: String, message: String },

    /// Another worker still holds the capture source
    #[error("Capture source busy: {0}")]
    CaptureBusy(String),

    /// Face matcher error
    #[error("Matcher error ({provider}): {message}")]
    Matcher { provider: String, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn capture(camera_id: impl ToString, message: impl Into<String>) -> Self {
        Error::Capture {
            camera_id: camera_id.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn matcher(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Matcher {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Recoverable by the worker's own retry path
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = Error::capture("3", "stream ended");
        assert_eq!(err.to_string(), "Capture error for camera 3: stream ended");
        assert!(err.is_transient());
    }

    #[test]
    fn test_config_error_not_transient() {
        let err = Error::Config("RECONCILE_INTERVAL_SEC must be > 0".to_string());
        assert!(!err.is_transient());
    }
}
