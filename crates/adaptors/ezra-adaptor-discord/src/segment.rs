//! Finished speech segments

use ezra_provider_voice::{encode_mono_wav, CAPTURE_SAMPLE_RATE};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::vad::{SegmentEnd, SpeechEnd};

/// Segments shorter than this (100 ms) are discarded
pub const MIN_SEGMENT_SAMPLES: usize = 4800;

/// One speaker's utterance, ready for transcription
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Speaker
    pub user_id: String,
    /// Guild of the producing session
    pub guild_id: String,
    /// Mono 16-bit samples at 48 kHz
    pub samples: Vec<i16>,
    /// When the speaker started talking
    pub started_at: Instant,
    /// What ended the utterance
    pub reason: SegmentEnd,
    /// Per-speaker sequence number
    pub sequence: u64,
}

impl Segment {
    /// Audio length
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / CAPTURE_SAMPLE_RATE as u64)
    }

    /// WAV file for the STT upload
    pub fn to_wav(&self) -> Vec<u8> {
        encode_mono_wav(&self.samples, CAPTURE_SAMPLE_RATE)
    }
}

/// Turns detector output into segments for one speaker
pub struct SegmentAssembler {
    guild_id: String,
    user_id: String,
    min_samples: usize,
    next_sequence: u64,
}

impl SegmentAssembler {
    /// Assembler for `user_id` in `guild_id`
    pub fn new(guild_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            user_id: user_id.into(),
            min_samples: MIN_SEGMENT_SAMPLES,
            next_sequence: 0,
        }
    }

    /// Override the minimum segment length
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Wrap an ended utterance, or drop it if too short
    pub fn finish(&mut self, end: SpeechEnd) -> Option<Segment> {
        if end.samples.len() < self.min_samples {
            debug!(
                user_id = %self.user_id,
                samples = end.samples.len(),
                "Discarding short segment"
            );
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Segment {
            user_id: self.user_id.clone(),
            guild_id: self.guild_id.clone(),
            samples: end.samples,
            started_at: end.started_at,
            reason: end.reason,
            sequence,
        })
    }
}
