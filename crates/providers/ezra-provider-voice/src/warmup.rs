//! Startup warmup of the speech services
//!
//! Both services load models lazily, so the first real request after a cold
//! start can take tens of seconds. At startup each service gets a
//! `POST /warmup` under bounded retry with linear backoff. Warmup failure is
//! logged and otherwise ignored.

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::http::{client, join_url};

/// Retry policy for warmup requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupPolicy {
    /// Maximum number of attempts per service
    pub max_attempts: u32,
    /// Delay before attempt `n` is `step * (n - 1)`
    pub step: Duration,
    /// Timeout of a single warmup request
    pub request_timeout: Duration,
}

impl Default for WarmupPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            step: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl WarmupPolicy {
    /// Delay to wait before the given 1-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.step * attempt.saturating_sub(1)
    }
}

/// Outcome of warming one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupOutcome {
    /// Service label used in logs
    pub service: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Whether any attempt answered 2xx
    pub succeeded: bool,
}

/// Outcome of warming both speech services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupReport {
    /// STT service outcome
    pub stt: WarmupOutcome,
    /// TTS service outcome
    pub tts: WarmupOutcome,
}

impl WarmupReport {
    /// True when both services answered
    pub fn all_ready(&self) -> bool {
        self.stt.succeeded && self.tts.succeeded
    }
}

/// Warm a single service, retrying until it answers or the attempts run out
pub async fn warmup_service(service: &str, base_url: &str, policy: WarmupPolicy) -> WarmupOutcome {
    let url = join_url(base_url, "/warmup");

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match client()
            .post(&url)
            .timeout(policy.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(service, attempts = attempt, "Speech service warmed up");
                return WarmupOutcome {
                    service: service.to_string(),
                    attempts: attempt,
                    succeeded: true,
                };
            }
            Ok(response) => {
                tracing::debug!(
                    service,
                    attempt,
                    status = response.status().as_u16(),
                    "Warmup rejected"
                );
            }
            Err(e) => {
                tracing::debug!(service, attempt, error = %e, "Warmup request failed");
            }
        }
    }

    tracing::warn!(
        service,
        attempts = policy.max_attempts,
        "Speech service did not warm up; continuing without it"
    );
    WarmupOutcome {
        service: service.to_string(),
        attempts: policy.max_attempts,
        succeeded: false,
    }
}

/// Warm STT and TTS concurrently
pub async fn warmup_services(stt_url: &str, tts_url: &str, policy: WarmupPolicy) -> WarmupReport {
    let (stt, tts) = tokio::join!(
        warmup_service("stt", stt_url, policy),
        warmup_service("tts", tts_url, policy)
    );
    WarmupReport { stt, tts }
}

/// Run [`warmup_services`] in a background task
pub fn spawn_warmup(stt_url: String, tts_url: String, policy: WarmupPolicy) -> JoinHandle<WarmupReport> {
    tokio::spawn(async move { warmup_services(&stt_url, &tts_url, policy).await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = WarmupPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(10), Duration::from_secs(18));
    }

    #[tokio::test]
    async fn test_unreachable_service_exhausts_attempts() {
        let policy = WarmupPolicy {
            max_attempts: 3,
            step: Duration::from_millis(5),
            request_timeout: Duration::from_millis(200),
        };
        // Port 9 (discard) on loopback refuses connections
        let outcome = warmup_service("stt", "http://127.0.0.1:9", policy).await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
    }
}
