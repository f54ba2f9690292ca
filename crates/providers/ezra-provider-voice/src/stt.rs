//! Speech-to-text client
//!
//! Uploads one WAV segment per request as `multipart/form-data` with a single
//! `audio` part and reads back `{"text": "..."}`. Failures are returned to the
//! caller, which logs and drops the segment; nothing is retried here.

use async_trait::async_trait;
use ezra_core::{EzraError, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::http::{client, join_url};
use crate::types::Transcriber;

/// Default number of concurrent transcriptions per client
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: String,
}

/// HTTP client for the STT service
#[derive(Clone)]
pub struct SttClient {
    base_url: String,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
}

impl SttClient {
    /// Client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the concurrency limit
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload a WAV file and return the trimmed transcript
    pub async fn transcribe_wav(&self, wav: Vec<u8>) -> Result<String> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| EzraError::Cancelled)?;

        let part = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| EzraError::other(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let url = join_url(&self.base_url, "/transcribe");
        let response = client()
            .post(&url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EzraError::SttUnavailable(format!("cannot connect to {}: {}", self.base_url, e))
                } else if e.is_timeout() {
                    EzraError::SttUnavailable(format!("request timed out: {}", e))
                } else {
                    EzraError::SttUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(EzraError::SttBadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EzraError::SttUnavailable(e.to_string()))?;
        let parsed: TranscribeResponse =
            serde_json::from_slice(&body).map_err(|e| EzraError::SttDecode(e.to_string()))?;

        let text = parsed.text.trim().to_string();
        tracing::debug!(chars = text.len(), "STT transcript received");
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for SttClient {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        self.transcribe_wav(wav).await
    }
}
