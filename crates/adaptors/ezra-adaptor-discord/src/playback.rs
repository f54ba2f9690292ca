//! Playback of synthesized replies through the bridge
//!
//! Synthesized WAV is written to a temp file and the bridge is asked to
//! play it by absolute path. Every file is scheduled for deletion once it
//! exists, after the estimated playback time plus a margin, whether or not
//! playback succeeds and even when the playback future is cancelled.
//!
//! In streaming mode playback starts as soon as [`STREAM_START_BYTES`] are
//! buffered. Later chunks are appended to the same file until the stream
//! ends, so a bridge reading the file as it grows hears the whole reply.

use bytes::BytesMut;
use ezra_core::{EzraError, Result};
use ezra_provider_voice::{Synthesizer, PLAYBACK_BYTES_PER_SECOND};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::VoiceBridge;

/// Buffered bytes after which streamed playback starts
pub const STREAM_START_BYTES: usize = 8 * 1024;

/// Write buffer for temp WAV files
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Minimum playback estimate
pub const MIN_PLAYBACK: Duration = Duration::from_secs(5);

/// Margin added to the playback estimate before deletion
pub const DELETE_MARGIN: Duration = Duration::from_secs(2);

/// Delay before a temp file of `bytes` bytes is removed
pub fn deletion_delay(bytes: usize) -> Duration {
    let estimate = Duration::from_secs((bytes / PLAYBACK_BYTES_PER_SECOND) as u64);
    estimate.max(MIN_PLAYBACK) + DELETE_MARGIN
}

/// Remove `path` after `delay`
pub fn schedule_deletion(path: PathBuf, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed playback file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove playback file"),
        }
    })
}

/// Temp WAV file that schedules its own deletion when dropped
///
/// `bytes` tracks the audio written so far and sizes the deletion delay.
struct TempAudioFile {
    path: PathBuf,
    bytes: usize,
}

impl TempAudioFile {
    async fn create(path: PathBuf) -> Result<(Self, BufWriter<File>)> {
        let file = File::create(&path).await?;
        let guard = Self { path, bytes: 0 };
        Ok((guard, BufWriter::with_capacity(WRITE_BUFFER_BYTES, file)))
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        if tokio::runtime::Handle::try_current().is_ok() {
            schedule_deletion(path, deletion_delay(self.bytes));
        } else if let Err(e) = std::fs::remove_file(&path) {
            debug!(path = %path.display(), error = %e, "Removing playback file outside the runtime failed");
        }
    }
}

/// What one playback cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Temp file handed to the bridge
    pub path: PathBuf,
    /// WAV bytes received from TTS
    pub bytes: usize,
    /// Bytes buffered when `PLAY` was issued
    pub started_at_bytes: usize,
    /// Whether playback started before the stream ended
    pub streamed: bool,
}

/// Synthesizes replies and hands them to the bridge
pub struct PlaybackDispatcher {
    bridge: Arc<dyn VoiceBridge>,
    tts: Arc<dyn Synthesizer>,
    streaming: bool,
    temp_dir: PathBuf,
}

impl PlaybackDispatcher {
    /// Dispatcher writing temp files under the OS temp directory
    pub fn new(bridge: Arc<dyn VoiceBridge>, tts: Arc<dyn Synthesizer>, streaming: bool) -> Self {
        Self {
            bridge,
            tts,
            streaming,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Write temp files under `dir` instead
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Whether streamed synthesis is used
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Synthesize `text` with `reference` and play it in `guild_id`
    pub async fn speak(&self, guild_id: &str, text: &str, reference: &Path) -> Result<PlaybackReport> {
        if self.streaming {
            self.speak_streaming(guild_id, text, reference).await
        } else {
            let wav = self.tts.synthesize(text, reference).await?;
            self.play_whole(guild_id, &wav).await
        }
    }

    async fn play_whole(&self, guild_id: &str, wav: &[u8]) -> Result<PlaybackReport> {
        let (mut file, mut writer) = TempAudioFile::create(self.temp_path("tts_")).await?;
        file.bytes = wav.len();
        writer.write_all(wav).await?;
        writer.shutdown().await?;

        self.bridge.play_audio(guild_id, &file.path).await?;
        info!(guild_id, bytes = wav.len(), path = %file.path.display(), "Playing synthesized reply");

        Ok(PlaybackReport {
            path: file.path.clone(),
            bytes: wav.len(),
            started_at_bytes: wav.len(),
            streamed: false,
        })
    }

    async fn speak_streaming(&self, guild_id: &str, text: &str, reference: &Path) -> Result<PlaybackReport> {
        let mut stream = self.tts.synthesize_stream(text, reference).await?;
        let mut buffered = BytesMut::new();

        // Buffer until the threshold
        while buffered.len() < STREAM_START_BYTES {
            match stream.recv().await {
                Some(chunk) => buffered.extend_from_slice(&chunk?),
                None => {
                    if buffered.is_empty() {
                        return Err(EzraError::TtsUnavailable("stream ended without audio".to_string()));
                    }
                    debug!(bytes = buffered.len(), "Stream ended below start threshold");
                    return self.play_whole(guild_id, &buffered).await;
                }
            }
        }

        let (mut file, mut writer) = TempAudioFile::create(self.temp_path("tts_stream_")).await?;
        let started_at_bytes = buffered.len();
        file.bytes = started_at_bytes;
        writer.write_all(&buffered).await?;
        writer.flush().await?;

        self.bridge.play_audio(guild_id, &file.path).await?;
        info!(guild_id, bytes = started_at_bytes, path = %file.path.display(), "Started streamed playback");

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk?;
            file.bytes += chunk.len();
            writer.write_all(&chunk).await?;
            writer.flush().await?;
        }
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Closing streamed playback file failed");
        }

        debug!(guild_id, bytes = file.bytes, "Streamed playback drained");
        Ok(PlaybackReport {
            path: file.path.clone(),
            bytes: file.bytes,
            started_at_bytes,
            streamed: true,
        })
    }

    fn temp_path(&self, prefix: &str) -> PathBuf {
        self.temp_dir.join(format!("{}{}.wav", prefix, Uuid::new_v4()))
    }
}
