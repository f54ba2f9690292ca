//! Energy-threshold voice activity detection
//!
//! Each speaker runs a two-state machine (`silent`, `speaking`) driven by
//! the normalized RMS of incoming frames. While speaking, every frame is
//! accumulated, trailing silence included. Speech ends once silence has
//! lasted `silence_grace`, or when the accumulator reaches `max_segment`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use ezra_provider_voice::CAPTURE_SAMPLE_RATE;

/// Samples per analysis frame (10 ms at 48 kHz)
pub const FRAME_SAMPLES: usize = 480;

/// VAD configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Normalized RMS above which a frame counts as voice
    pub energy_threshold: f64,
    /// Trailing silence that ends a segment
    pub silence_grace: Duration,
    /// Accumulator length that forces a segment out
    pub max_segment: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_grace: Duration::from_millis(1000),
            max_segment: Duration::from_secs(30),
        }
    }
}

impl VadConfig {
    /// Accumulator cap in samples
    pub fn max_segment_samples(&self) -> usize {
        (self.max_segment.as_millis() as usize) * CAPTURE_SAMPLE_RATE as usize / 1000
    }
}

/// Normalized RMS energy of a frame, in `[0, 1]`
pub fn frame_energy(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum / frame.len() as f64).sqrt()
}

/// Why a segment was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// Silence lasted the full grace period
    Silence,
    /// The accumulator hit its cap
    MaxLength,
}

/// Samples emitted when a speaker leaves `speaking`
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEnd {
    /// Accumulated samples, trailing silence included
    pub samples: Vec<i16>,
    /// When the speech started
    pub started_at: Instant,
    /// What ended it
    pub reason: SegmentEnd,
}

/// Per-speaker detector state
#[derive(Debug, Clone)]
pub struct SpeakerState {
    /// Whether the speaker is mid-utterance
    pub is_speaking: bool,
    /// Start of the current utterance
    pub speech_started_at: Option<Instant>,
    /// Last frame above the threshold
    pub last_voice_at: Option<Instant>,
    /// Start of the current run of silent frames while speaking
    pub silence_started_at: Option<Instant>,
    /// Last frame of any kind
    pub last_frame_at: Option<Instant>,
    /// Samples of the current utterance
    pub pcm_accumulator: Vec<i16>,
}

impl Default for SpeakerState {
    fn default() -> Self {
        Self {
            is_speaking: false,
            speech_started_at: None,
            last_voice_at: None,
            silence_started_at: None,
            last_frame_at: None,
            pcm_accumulator: Vec::with_capacity(CAPTURE_SAMPLE_RATE as usize),
        }
    }
}

impl SpeakerState {
    fn finish(&mut self, reason: SegmentEnd, now: Instant) -> SpeechEnd {
        self.is_speaking = false;
        self.silence_started_at = None;
        let started_at = self.speech_started_at.take().unwrap_or(now);
        SpeechEnd {
            samples: std::mem::take(&mut self.pcm_accumulator),
            started_at,
            reason,
        }
    }
}

/// Voice activity detector for every speaker in a session
pub struct VoiceActivityDetector {
    config: VadConfig,
    speakers: Mutex<HashMap<String, SpeakerState>>,
}

impl VoiceActivityDetector {
    /// Detector with the given thresholds
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speakers: Mutex::new(HashMap::new()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Feed one frame for `user_id`
    pub fn process_frame(&self, user_id: &str, frame: &[i16]) -> Option<SpeechEnd> {
        self.process_frame_at(user_id, frame, Instant::now())
    }

    /// Feed one frame observed at `now`
    pub fn process_frame_at(&self, user_id: &str, frame: &[i16], now: Instant) -> Option<SpeechEnd> {
        let energy = frame_energy(frame);
        let voiced = energy > self.config.energy_threshold;

        let mut speakers = self.speakers.lock();
        let state = speakers.entry(user_id.to_string()).or_default();
        state.last_frame_at = Some(now);

        if voiced {
            if !state.is_speaking {
                state.is_speaking = true;
                state.speech_started_at = Some(now);
                state.pcm_accumulator.clear();
                trace!(user_id, energy, "Speech started");
            }
            state.last_voice_at = Some(now);
            state.silence_started_at = None;
            state.pcm_accumulator.extend_from_slice(frame);
        } else if state.is_speaking {
            match state.silence_started_at {
                None => {
                    state.silence_started_at = Some(now);
                    state.pcm_accumulator.extend_from_slice(frame);
                }
                Some(since) if now.duration_since(since) >= self.config.silence_grace => {
                    let end = state.finish(SegmentEnd::Silence, now);
                    debug!(user_id, samples = end.samples.len(), "Speech ended");
                    return Some(end);
                }
                Some(_) => state.pcm_accumulator.extend_from_slice(frame),
            }
        } else {
            return None;
        }

        if state.pcm_accumulator.len() >= self.config.max_segment_samples() {
            let end = state.finish(SegmentEnd::MaxLength, now);
            debug!(user_id, samples = end.samples.len(), "Segment hit length cap");
            return Some(end);
        }

        None
    }

    /// End an utterance whose frames stopped arriving
    ///
    /// The bridge sends nothing during silence, so the grace timer also
    /// runs from the last frame of any kind.
    pub fn flush_if_silent(&self, user_id: &str, now: Instant) -> Option<SpeechEnd> {
        let mut speakers = self.speakers.lock();
        let state = speakers.get_mut(user_id)?;
        if !state.is_speaking {
            return None;
        }

        let quiet_since = match (state.silence_started_at, state.last_frame_at) {
            (Some(silence), _) => silence,
            (None, Some(last)) => last,
            (None, None) => return None,
        };
        if now.duration_since(quiet_since) < self.config.silence_grace {
            return None;
        }

        let end = state.finish(SegmentEnd::Silence, now);
        debug!(user_id, samples = end.samples.len(), "Speech ended (stream idle)");
        Some(end)
    }

    /// Whether `user_id` is mid-utterance
    pub fn is_speaking(&self, user_id: &str) -> bool {
        self.speakers
            .lock()
            .get(user_id)
            .map(|s| s.is_speaking)
            .unwrap_or(false)
    }

    /// Swap out the accumulator of `user_id`
    pub fn take_speech_buffer(&self, user_id: &str) -> Vec<i16> {
        self.speakers
            .lock()
            .get_mut(user_id)
            .map(|s| std::mem::take(&mut s.pcm_accumulator))
            .unwrap_or_default()
    }

    /// Users whose last voiced frame is within `window`
    pub fn active_users(&self, window: Duration) -> Vec<String> {
        self.active_users_at(window, Instant::now())
    }

    /// Users whose last voiced frame is within `window` of `now`
    pub fn active_users_at(&self, window: Duration, now: Instant) -> Vec<String> {
        let mut active: Vec<String> = self
            .speakers
            .lock()
            .iter()
            .filter(|(_, s)| {
                s.last_voice_at
                    .map(|at| now.saturating_duration_since(at) <= window)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    /// Forget a speaker
    pub fn clear_user(&self, user_id: &str) {
        self.speakers.lock().remove(user_id);
    }

    /// Snapshot of a speaker's state
    pub fn speaker(&self, user_id: &str) -> Option<SpeakerState> {
        self.speakers.lock().get(user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame whose normalized RMS equals `energy`
    fn frame(energy: f64) -> Vec<i16> {
        vec![(energy * 32768.0).round() as i16; FRAME_SAMPLES]
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_energy() {
        assert_eq!(frame_energy(&[]), 0.0);
        assert!((frame_energy(&frame(0.05)) - 0.05).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_energy_is_silence() {
        let vad = VoiceActivityDetector::new(VadConfig {
            energy_threshold: 0.5,
            ..Default::default()
        });
        // 16384 / 32768 is exactly 0.5
        let at_threshold = vec![16384i16; FRAME_SAMPLES];
        assert_eq!(frame_energy(&at_threshold), 0.5);
        vad.process_frame_at("u1", &at_threshold, Instant::now());
        assert!(!vad.is_speaking("u1"));
    }

    #[test]
    fn test_speech_then_grace_emits_once() {
        let vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();

        for i in 0..150 {
            assert!(vad.process_frame_at("u1", &frame(0.05), t0 + ms(i * 10)).is_none());
        }
        assert!(vad.is_speaking("u1"));

        // first silent frame starts the grace timer and is retained
        let silence_start = t0 + ms(1500);
        assert!(vad.process_frame_at("u1", &frame(0.0), silence_start).is_none());
        let state = vad.speaker("u1").unwrap();
        assert_eq!(state.silence_started_at, Some(silence_start));
        assert_eq!(state.pcm_accumulator.len(), 151 * FRAME_SAMPLES);

        assert!(vad.process_frame_at("u1", &frame(0.0), silence_start + ms(990)).is_none());
        let end = vad
            .process_frame_at("u1", &frame(0.0), silence_start + ms(1000))
            .unwrap();
        assert_eq!(end.reason, SegmentEnd::Silence);
        assert_eq!(end.samples.len(), 152 * FRAME_SAMPLES);
        assert_eq!(end.started_at, t0);
        assert!(!vad.is_speaking("u1"));

        // silent + silent stays silent
        assert!(vad.process_frame_at("u1", &frame(0.0), silence_start + ms(1100)).is_none());
        assert!(vad.take_speech_buffer("u1").is_empty());
    }

    #[test]
    fn test_short_bursts_never_emit_before_grace() {
        let vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        let mut t = t0;
        for _ in 0..5 {
            vad.process_frame_at("u1", &frame(0.05), t);
            vad.process_frame_at("u1", &frame(0.0), t + ms(300));
            assert!(vad.process_frame_at("u1", &frame(0.0), t + ms(900)).is_none());
            t += ms(1000);
        }
        assert!(vad.is_speaking("u1"));
        assert!(vad.speaker("u1").unwrap().silence_started_at.is_some());
    }

    #[test]
    fn test_voice_clears_silence_timer() {
        let vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process_frame_at("u1", &frame(0.05), t0);
        vad.process_frame_at("u1", &frame(0.0), t0 + ms(10));
        vad.process_frame_at("u1", &frame(0.05), t0 + ms(20));
        assert_eq!(vad.speaker("u1").unwrap().silence_started_at, None);
    }

    #[test]
    fn test_flush_when_frames_stop() {
        let vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process_frame_at("u1", &frame(0.05), t0);

        assert!(vad.flush_if_silent("u1", t0 + ms(999)).is_none());
        let end = vad.flush_if_silent("u1", t0 + ms(1000)).unwrap();
        assert_eq!(end.samples.len(), FRAME_SAMPLES);
        assert!(vad.flush_if_silent("u1", t0 + ms(3000)).is_none());
        assert!(vad.flush_if_silent("nobody", t0).is_none());
    }

    #[test]
    fn test_force_emit_at_cap() {
        let vad = VoiceActivityDetector::new(VadConfig {
            max_segment: ms(100),
            ..Default::default()
        });
        let t0 = Instant::now();
        let mut emitted = None;
        for i in 0..10 {
            if let Some(end) = vad.process_frame_at("u1", &frame(0.05), t0 + ms(i * 10)) {
                emitted = Some((i, end));
                break;
            }
        }
        let (i, end) = emitted.unwrap();
        assert_eq!(i, 9);
        assert_eq!(end.reason, SegmentEnd::MaxLength);
        assert_eq!(end.samples.len(), 4800);
        assert!(!vad.is_speaking("u1"));
    }

    #[test]
    fn test_active_users_window() {
        let vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process_frame_at("u1", &frame(0.05), t0);
        vad.process_frame_at("u2", &frame(0.05), t0 + ms(1500));
        vad.process_frame_at("u3", &frame(0.0), t0 + ms(1500));

        let window = Duration::from_secs(2);
        assert_eq!(vad.active_users_at(window, t0 + ms(2000)), vec!["u1", "u2"]);
        assert_eq!(vad.active_users_at(window, t0 + ms(2500)), vec!["u2"]);
        assert!(vad.active_users_at(window, t0 + ms(4000)).is_empty());
    }
}
