//! Reference-conditioned text-to-speech client

use async_trait::async_trait;
use bytes::Bytes;
use ezra_core::{EzraError, Result};
use futures_util::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::http::{client, join_url};
use crate::types::{create_audio_stream, AudioStream, Synthesizer};

/// Chunks buffered between the HTTP body and the consumer
const STREAM_BUFFER: usize = 32;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    reference_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// HTTP client for the TTS service
#[derive(Debug, Clone)]
pub struct TtsClient {
    base_url: String,
    timeout: Duration,
}

impl TtsClient {
    /// Client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, text: &str, reference_path: &Path, stream: bool) -> Result<reqwest::Response> {
        let body = SynthesizeRequest {
            text,
            reference_path: reference_path.to_string_lossy().into_owned(),
            stream: stream.then_some(true),
        };

        let url = join_url(&self.base_url, "/synthesize");
        let response = client()
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EzraError::TtsUnavailable(format!("cannot connect to {}: {}", self.base_url, e))
                } else if e.is_timeout() {
                    EzraError::TtsUnavailable(format!("request timed out: {}", e))
                } else {
                    EzraError::TtsUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EzraError::TtsBadStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Synthesizer for TtsClient {
    async fn synthesize(&self, text: &str, reference_path: &Path) -> Result<Bytes> {
        let response = self.post(text, reference_path, false).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EzraError::TtsUnavailable(e.to_string()))?;

        tracing::debug!(bytes = bytes.len(), "TTS response received");
        Ok(bytes)
    }

    async fn synthesize_stream(&self, text: &str, reference_path: &Path) -> Result<AudioStream> {
        // Status is checked before handing out the stream so a rejected
        // request surfaces as an error rather than an empty stream.
        let response = self.post(text, reference_path, true).await?;
        let (tx, rx) = create_audio_stream(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) if chunk.is_empty() => continue,
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(EzraError::TtsUnavailable(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = SynthesizeRequest {
            text: "It is 10:00.",
            reference_path: "/refs/u1.wav".to_string(),
            stream: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "It is 10:00.");
        assert_eq!(json["reference_path"], "/refs/u1.wav");
        assert!(json.get("stream").is_none());

        let body = SynthesizeRequest {
            stream: Some(true),
            ..body
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["stream"], true);
    }
}
