//! In-process doubles for the bridge and speech services

use async_trait::async_trait;
use bytes::Bytes;
use ezra_core::{EzraError, Result};
use ezra_provider_voice::{
    create_audio_stream, AudioStream, AudioStreamSender, Synthesizer, Transcriber, WavHeader,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::bridge::VoiceBridge;

/// Bridge recording every command it receives
#[derive(Default)]
pub struct RecordingBridge {
    joins: Mutex<Vec<(String, String)>>,
    plays: Mutex<Vec<(String, PathBuf, u64)>>,
    fail_plays: bool,
}

impl RecordingBridge {
    /// Bridge accepting every command
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge rejecting `PLAY` as if the connection had dropped
    pub fn failing_plays() -> Self {
        Self {
            fail_plays: true,
            ..Default::default()
        }
    }

    /// `(guild_id, channel_id)` of every join
    pub fn joins(&self) -> Vec<(String, String)> {
        self.joins.lock().clone()
    }

    /// `(guild_id, path)` of every play
    pub fn plays(&self) -> Vec<(String, PathBuf)> {
        self.plays.lock().iter().map(|(g, p, _)| (g.clone(), p.clone())).collect()
    }

    /// File size observed when each `PLAY` arrived
    pub fn play_sizes(&self) -> Vec<u64> {
        self.plays.lock().iter().map(|(_, _, size)| *size).collect()
    }
}

#[async_trait]
impl VoiceBridge for RecordingBridge {
    async fn join_channel(&self, guild_id: &str, channel_id: &str) -> Result<()> {
        self.joins
            .lock()
            .push((guild_id.to_string(), channel_id.to_string()));
        Ok(())
    }

    async fn play_audio(&self, guild_id: &str, path: &Path) -> Result<()> {
        if self.fail_plays {
            return Err(EzraError::bridge_lost("not connected"));
        }
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        self.plays
            .lock()
            .push((guild_id.to_string(), path.to_path_buf(), size));
        Ok(())
    }
}

/// Transcriber replaying scripted transcripts
///
/// Once the script is exhausted every segment transcribes to the empty
/// string.
#[derive(Default)]
pub struct ScriptedTranscriber {
    script: Mutex<VecDeque<Result<String>>>,
    sample_counts: Mutex<Vec<usize>>,
}

impl ScriptedTranscriber {
    /// Transcriber with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transcript
    pub fn then_text(self, text: &str) -> Self {
        self.script.lock().push_back(Ok(text.to_string()));
        self
    }

    /// Queue a failure
    pub fn then_fail(self, error: EzraError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Sample count of every uploaded WAV, in call order
    pub fn sample_counts(&self) -> Vec<usize> {
        self.sample_counts.lock().clone()
    }

    /// Number of transcription calls
    pub fn calls(&self) -> usize {
        self.sample_counts.lock().len()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let samples = WavHeader::parse(&wav)?.sample_count();
        self.sample_counts.lock().push(samples);
        self.script.lock().pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}

/// Synthesizer returning fixed audio
pub struct ScriptedSynthesizer {
    chunks: Vec<Bytes>,
    fail: bool,
    hold_open: bool,
    open_streams: Mutex<Vec<AudioStreamSender>>,
    requests: Mutex<Vec<(String, PathBuf)>>,
}

impl ScriptedSynthesizer {
    /// Synthesizer producing `wav`, streamed as a single chunk
    pub fn new(wav: impl Into<Bytes>) -> Self {
        Self::chunked(vec![wav.into()])
    }

    /// Synthesizer streaming `chunks` in order
    pub fn chunked(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            fail: false,
            hold_open: false,
            open_streams: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Synthesizer streaming `chunks` and then never finishing the stream
    pub fn stalling(chunks: Vec<Bytes>) -> Self {
        Self {
            hold_open: true,
            ..Self::chunked(chunks)
        }
    }

    /// Synthesizer whose service is down
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::chunked(Vec::new())
        }
    }

    /// `(text, reference_path)` of every request
    pub fn requests(&self) -> Vec<(String, PathBuf)> {
        self.requests.lock().clone()
    }

    fn record(&self, text: &str, reference_path: &Path) -> Result<()> {
        self.requests
            .lock()
            .push((text.to_string(), reference_path.to_path_buf()));
        if self.fail {
            return Err(EzraError::TtsUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, reference_path: &Path) -> Result<Bytes> {
        self.record(text, reference_path)?;
        Ok(Bytes::from(self.chunks.concat()))
    }

    async fn synthesize_stream(&self, text: &str, reference_path: &Path) -> Result<AudioStream> {
        self.record(text, reference_path)?;
        let (tx, rx) = create_audio_stream(self.chunks.len().max(1));
        for chunk in &self.chunks {
            if tx.send(Ok(chunk.clone())).await.is_err() {
                break;
            }
        }
        if self.hold_open {
            self.open_streams.lock().push(tx);
        }
        Ok(rx)
    }
}
