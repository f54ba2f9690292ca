//! Error types for Ezra

use thiserror::Error;

/// Main error type for Ezra operations
#[derive(Debug, Error)]
pub enum EzraError {
    /// The voice bridge never answered the connectivity probe
    #[error("Voice bridge unavailable at {url} after {attempts} attempts")]
    BridgeUnavailable {
        /// Bridge control URL
        url: String,
        /// Number of probe attempts made
        attempts: u32,
    },

    /// An established bridge connection dropped
    #[error("Voice bridge connection lost: {0}")]
    BridgeLost(String),

    /// No live gateway socket to forward a payload onto
    #[error("Gateway socket not ready")]
    GatewayNotReady,

    /// Audio datagram or WAV data could not be parsed
    #[error("Malformed audio: {0}")]
    AudioMalformed(String),

    /// STT service could not be reached
    #[error("STT service unavailable: {0}")]
    SttUnavailable(String),

    /// STT service answered with a non-success status
    #[error("STT service returned status {status}: {body}")]
    SttBadStatus {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// STT response body was not the expected JSON
    #[error("STT response could not be decoded: {0}")]
    SttDecode(String),

    /// TTS service could not be reached
    #[error("TTS service unavailable: {0}")]
    TtsUnavailable(String),

    /// TTS service answered with a non-success status
    #[error("TTS service returned status {status}: {body}")]
    TtsBadStatus {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// Neither a user-specific nor a default reference exists
    #[error("No reference audio for user {0} and no default available")]
    NoReference(String),

    /// Reference upload has an extension the store does not accept
    #[error("Unsupported audio format: {0} (supported: wav, mp3, ogg, m4a, flac, aac)")]
    UnsupportedFormat(String),

    /// External transcoder failed to normalize an upload
    #[error("Audio transcode failed: {0}")]
    TranscodeFailed(String),

    /// No messages to derive a personality profile from
    #[error("No messages found from user {0}")]
    ProfileCorpusEmpty(String),

    /// Response queue is at capacity
    #[error("Response queue is full ({limit} items)")]
    QueueFull {
        /// Maximum number of queued responses
        limit: usize,
    },

    /// Operation aborted by session or task cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure reported by an external collaborator (LLM, search, repository)
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using EzraError
pub type Result<T> = std::result::Result<T, EzraError>;

impl EzraError {
    /// Create a bridge-lost error
    pub fn bridge_lost(msg: impl Into<String>) -> Self {
        EzraError::BridgeLost(msg.into())
    }

    /// Create a malformed-audio error
    pub fn audio_malformed(msg: impl Into<String>) -> Self {
        EzraError::AudioMalformed(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        EzraError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        EzraError::Validation(msg.into())
    }

    /// Create a collaborator error
    pub fn collaborator(msg: impl Into<String>) -> Self {
        EzraError::Collaborator(msg.into())
    }

    /// Create a transcode error
    pub fn transcode(msg: impl Into<String>) -> Self {
        EzraError::TranscodeFailed(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        EzraError::Other(msg.into())
    }

    /// True for cancellation, which task boundaries swallow
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EzraError::Cancelled)
    }

    /// Stable short name for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            EzraError::BridgeUnavailable { .. } => "bridge_unavailable",
            EzraError::BridgeLost(_) => "bridge_lost",
            EzraError::GatewayNotReady => "gateway_not_ready",
            EzraError::AudioMalformed(_) => "audio_malformed",
            EzraError::SttUnavailable(_) => "stt_unavailable",
            EzraError::SttBadStatus { .. } => "stt_bad_status",
            EzraError::SttDecode(_) => "stt_decode",
            EzraError::TtsUnavailable(_) => "tts_unavailable",
            EzraError::TtsBadStatus { .. } => "tts_bad_status",
            EzraError::NoReference(_) => "no_reference",
            EzraError::UnsupportedFormat(_) => "unsupported_format",
            EzraError::TranscodeFailed(_) => "transcode_failed",
            EzraError::ProfileCorpusEmpty(_) => "profile_corpus_empty",
            EzraError::QueueFull { .. } => "queue_full",
            EzraError::Cancelled => "cancelled",
            EzraError::Serialization(_) => "serialization",
            EzraError::Io(_) => "io",
            EzraError::Config(_) => "config",
            EzraError::Validation(_) => "validation",
            EzraError::Collaborator(_) => "collaborator",
            EzraError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EzraError::config("missing STT url");
        assert_eq!(err.to_string(), "Configuration error: missing STT url");

        let err = EzraError::QueueFull { limit: 10 };
        assert_eq!(err.to_string(), "Response queue is full (10 items)");
        assert_eq!(err.kind(), "queue_full");
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(EzraError::Cancelled.is_cancelled());
        assert!(!EzraError::GatewayNotReady.is_cancelled());
    }

    #[test]
    fn test_io_conversion() {
        fn open_missing() -> Result<()> {
            std::fs::File::open("/definitely/not/here.wav")?;
            Ok(())
        }

        let err = open_missing().unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
