//! HTTP recognition service adapter

use super::types::{FaceMatch, RecognizeResponse};
use super::FaceMatcher;
use crate::capture::Frame;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

/// Face matcher behind an HTTP recognition service
pub struct HttpFaceMatcher {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl HttpFaceMatcher {
    /// Create new client
    ///
    /// # Arguments
    /// * `base_url` - Service root (e.g., http://localhost:8000)
    /// * `timeout` - Bound for every request
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            client,
            name: format!("http:{}", base_url),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FaceMatcher for HttpFaceMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::matcher(
                &self.name,
                format!("health check returned {}", resp.status()),
            ));
        }
        Ok(())
    }

    async fn match_faces(&self, frame: &Frame) -> Result<Vec<FaceMatch>> {
        let url = format!("{}/v1/recognize", self.base_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data.clone())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("captured_at", frame.captured_at.to_rfc3339());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::matcher(
                &self.name,
                format!("recognize failed: {} - {}", status, body),
            ));
        }

        let result: RecognizeResponse = resp.json().await?;
        Ok(result.faces.into_iter().map(FaceMatch::from).collect())
    }
}
