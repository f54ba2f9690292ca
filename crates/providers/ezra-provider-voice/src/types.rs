//! Core types for the voice provider

use async_trait::async_trait;
use bytes::Bytes;
use ezra_core::Result;
use std::path::Path;
use tokio::sync::mpsc;

/// Sample rate of PCM arriving from the bridge
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;

/// Sample rate of reference WAVs and synthesized speech
pub const REFERENCE_SAMPLE_RATE: u32 = 24_000;

/// Divisor used to estimate playback seconds from a WAV byte count
pub const PLAYBACK_BYTES_PER_SECOND: usize = 24_000;

/// Ordered chunks of one synthesized WAV stream
pub type AudioStream = mpsc::Receiver<Result<Bytes>>;

/// Sending half of an [`AudioStream`]
pub type AudioStreamSender = mpsc::Sender<Result<Bytes>>;

/// Create an audio stream channel
pub fn create_audio_stream(buffer_size: usize) -> (AudioStreamSender, AudioStream) {
    mpsc::channel(buffer_size)
}

/// Speech-to-text backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete WAV file, returning the trimmed transcript
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}

/// Reference-conditioned text-to-speech backend
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into one complete WAV body
    async fn synthesize(&self, text: &str, reference_path: &Path) -> Result<Bytes>;

    /// Synthesize `text` as a stream of WAV byte chunks
    async fn synthesize_stream(&self, text: &str, reference_path: &Path) -> Result<AudioStream>;
}
