//! Voice sessions and the per-guild session registry
//!
//! A session owns a cancellation token and every task spawned on its
//! behalf: one frame processor and one transcription worker per speaker,
//! plus the orchestrator's dispatch loop. Dropping out of a channel cancels
//! the token and waits briefly for those tasks to finish.

use ezra_core::{AgentOrchestrator, Result, VoiceSettings};
use ezra_provider_voice::{ReferenceStore, Transcriber};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bridge::VoiceBridge;
use crate::ingress::{FrameSink, PcmFrame};
use crate::orchestrator::{OrchestratorConfig, VoiceOrchestrator};
use crate::playback::PlaybackDispatcher;
use crate::segment::{Segment, SegmentAssembler, MIN_SEGMENT_SAMPLES};
use crate::ssrc::{parse_ssrc_tag, SsrcResolver};
use crate::vad::{SpeechEnd, VadConfig, VoiceActivityDetector, FRAME_SAMPLES};

/// Frames buffered per speaker before new ones are dropped
pub const SPEAKER_CHANNEL_CAPACITY: usize = 100;

/// How long teardown waits for session tasks
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for every session
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Voice activity detection
    pub vad: VadConfig,
    /// Turn taking
    pub orchestrator: OrchestratorConfig,
    /// Shortest segment sent to STT
    pub min_segment_samples: usize,
    /// Per-speaker frame channel capacity
    pub speaker_channel_capacity: usize,
    /// How often an idle speaker is checked for end of speech
    pub flush_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            min_segment_samples: MIN_SEGMENT_SAMPLES,
            speaker_channel_capacity: SPEAKER_CHANNEL_CAPACITY,
            flush_poll: Duration::from_millis(100),
        }
    }
}

impl PipelineConfig {
    /// Pipeline for `agent_id` using the configured thresholds
    pub fn from_settings(settings: &VoiceSettings, agent_id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.vad.energy_threshold = settings.vad_threshold;
        config.vad.silence_grace = settings.silence_duration();
        config.orchestrator.agent_id = agent_id.into();
        config
    }
}

/// Collaborators shared by all sessions
#[derive(Clone)]
pub struct VoiceServices {
    /// Bridge command channel
    pub bridge: Arc<dyn VoiceBridge>,
    /// STT backend
    pub transcriber: Arc<dyn Transcriber>,
    /// Agent turn runner
    pub agent: Arc<dyn AgentOrchestrator>,
    /// Reference audio
    pub references: Arc<ReferenceStore>,
    /// TTS and playback
    pub playback: Arc<PlaybackDispatcher>,
}

// ============================================================================
// Session
// ============================================================================

/// Snapshot reported by the status tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Always true for a live session
    pub connected: bool,
    /// Guild
    pub guild_id: String,
    /// Voice channel
    pub channel_id: String,
    /// Replies waiting
    pub queue_length: usize,
    /// Whether a reply is being spoken
    pub is_responding: bool,
    /// Users heard in the last two seconds
    pub active_speakers: Vec<String>,
}

/// Voice presence in one guild
pub struct VoiceSession {
    guild_id: String,
    channel_id: String,
    joined_at: Instant,
    config: PipelineConfig,
    cancel: CancellationToken,
    ssrc: SsrcResolver,
    vad: Arc<VoiceActivityDetector>,
    orchestrator: Arc<VoiceOrchestrator>,
    transcriber: Arc<dyn Transcriber>,
    speakers: Mutex<HashMap<String, mpsc::Sender<Vec<i16>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dropped_frames: AtomicU64,
}

impl VoiceSession {
    /// Create a session and start its dispatch loop under `parent`
    pub fn start(
        guild_id: &str,
        channel_id: &str,
        config: PipelineConfig,
        services: &VoiceServices,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let vad = Arc::new(VoiceActivityDetector::new(config.vad));
        let orchestrator = Arc::new(VoiceOrchestrator::new(
            guild_id,
            config.orchestrator.clone(),
            vad.clone(),
            services.agent.clone(),
            services.references.clone(),
            services.playback.clone(),
        ));

        let session = Arc::new(Self {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            joined_at: Instant::now(),
            config,
            cancel: parent.child_token(),
            ssrc: SsrcResolver::new(),
            vad,
            orchestrator: orchestrator.clone(),
            transcriber: services.transcriber.clone(),
            speakers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            dropped_frames: AtomicU64::new(0),
        });

        let dispatch = tokio::spawn(orchestrator.run(session.cancel.clone()));
        session.tasks.lock().push(dispatch);
        session
    }

    /// Guild
    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Voice channel
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Time since the session started
    pub fn uptime(&self) -> Duration {
        self.joined_at.elapsed()
    }

    /// SSRC bindings and channel membership
    pub fn ssrc(&self) -> &SsrcResolver {
        &self.ssrc
    }

    /// Voice activity detector
    pub fn vad(&self) -> &Arc<VoiceActivityDetector> {
        &self.vad
    }

    /// Turn orchestrator
    pub fn orchestrator(&self) -> &Arc<VoiceOrchestrator> {
        &self.orchestrator
    }

    /// Whether teardown has begun
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Frames dropped because a speaker's channel was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Map an ingress source id to a user, if possible
    pub fn resolve_source(&self, source_id: &str) -> Option<String> {
        match parse_ssrc_tag(source_id) {
            Some(ssrc) => self.ssrc.resolve(ssrc),
            None => Some(source_id.to_string()),
        }
    }

    /// Hand frames from `user_id` to that speaker's processor
    ///
    /// The processor is spawned on first observation. When its channel is
    /// full the new frame is dropped.
    pub fn deliver(&self, user_id: &str, samples: Vec<i16>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let sender = {
            let mut speakers = self.speakers.lock();
            match speakers.get(user_id) {
                Some(sender) => sender.clone(),
                None => {
                    let sender = self.spawn_speaker(user_id);
                    speakers.insert(user_id.to_string(), sender.clone());
                    sender
                }
            }
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(samples) {
            let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(guild_id = %self.guild_id, user_id, dropped, "Speaker channel full, dropping frame");
        }
    }

    fn spawn_speaker(&self, user_id: &str) -> mpsc::Sender<Vec<i16>> {
        let (frame_tx, frame_rx) = mpsc::channel(self.config.speaker_channel_capacity);
        let (segment_tx, segment_rx) = mpsc::unbounded_channel();

        let assembler = SegmentAssembler::new(self.guild_id.clone(), user_id)
            .with_min_samples(self.config.min_segment_samples);

        let processor = tokio::spawn(run_speaker(
            user_id.to_string(),
            frame_rx,
            self.vad.clone(),
            assembler,
            segment_tx,
            self.config.flush_poll,
            self.cancel.clone(),
        ));
        let worker = tokio::spawn(run_transcriber(
            segment_rx,
            self.transcriber.clone(),
            self.orchestrator.clone(),
            self.cancel.clone(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.push(processor);
        tasks.push(worker);
        debug!(guild_id = %self.guild_id, user_id, "Started speaker pipeline");
        frame_tx
    }

    /// Status snapshot
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connected: true,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            queue_length: self.orchestrator.queue().len(),
            is_responding: self.orchestrator.is_responding(),
            active_speakers: self.vad.active_users(self.config.orchestrator.quiet_window),
        }
    }

    /// Cancel every task, drain the queue and wait for the tasks to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let dropped = self.orchestrator.queue().clear();
        self.speakers.lock().clear();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let aborted = join_within(tasks, SHUTDOWN_GRACE).await;
        if aborted > 0 {
            warn!(guild_id = %self.guild_id, aborted, "Session tasks did not stop in time, aborted");
        }
        debug!(guild_id = %self.guild_id, dropped, "Session shut down");
    }
}

/// Wait up to `grace` for all `tasks` together, aborting the stragglers
///
/// Returns how many tasks were still running when the grace ran out.
pub(crate) async fn join_within(tasks: Vec<JoinHandle<()>>, grace: Duration) -> usize {
    let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(grace, join_all(tasks)).await.is_ok() {
        return 0;
    }
    let mut pending = 0;
    for abort in aborts {
        if !abort.is_finished() {
            pending += 1;
            abort.abort();
        }
    }
    pending
}

async fn run_speaker(
    user_id: String,
    mut frames: mpsc::Receiver<Vec<i16>>,
    vad: Arc<VoiceActivityDetector>,
    mut assembler: SegmentAssembler,
    segments: mpsc::UnboundedSender<Segment>,
    flush_poll: Duration,
    cancel: CancellationToken,
) {
    loop {
        let ended: Vec<SpeechEnd> = tokio::select! {
            _ = cancel.cancelled() => break,
            received = tokio::time::timeout(flush_poll, frames.recv()) => match received {
                Ok(Some(samples)) => samples
                    .chunks(FRAME_SAMPLES)
                    .filter_map(|frame| vad.process_frame(&user_id, frame))
                    .collect(),
                Ok(None) => break,
                Err(_) => vad.flush_if_silent(&user_id, Instant::now()).into_iter().collect(),
            },
        };

        for end in ended {
            if let Some(segment) = assembler.finish(end) {
                if segments.send(segment).is_err() {
                    return;
                }
            }
        }
    }
    vad.clear_user(&user_id);
}

async fn run_transcriber(
    mut segments: mpsc::UnboundedReceiver<Segment>,
    transcriber: Arc<dyn Transcriber>,
    orchestrator: Arc<VoiceOrchestrator>,
    cancel: CancellationToken,
) {
    loop {
        let segment = tokio::select! {
            _ = cancel.cancelled() => break,
            segment = segments.recv() => match segment {
                Some(segment) => segment,
                None => break,
            },
        };

        let transcript = tokio::select! {
            _ = cancel.cancelled() => break,
            r = transcriber.transcribe(segment.to_wav()) => r,
        };

        let text = match transcript {
            Ok(text) if text.is_empty() => {
                debug!(user_id = %segment.user_id, "Empty transcript discarded");
                continue;
            }
            Ok(text) => text,
            Err(e) => {
                warn!(user_id = %segment.user_id, error = %e, kind = e.kind(), "Transcription failed");
                continue;
            }
        };
        info!(
            guild_id = %segment.guild_id,
            user_id = %segment.user_id,
            sequence = segment.sequence,
            text = %text,
            "Transcribed user speech"
        );

        let handled = tokio::select! {
            _ = cancel.cancelled() => break,
            r = orchestrator.handle_transcript(&segment.user_id, &text) => r,
        };
        if let Err(e) = handled {
            warn!(user_id = %segment.user_id, error = %e, kind = e.kind(), "Could not queue reply");
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Result of a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new session was started
    Joined,
    /// Already in that channel
    AlreadyConnected,
    /// Left `from` in the same guild and joined the new channel
    Moved {
        /// Previous channel
        from: String,
    },
}

/// Registry of live voice sessions, keyed by guild
pub struct VoiceManager {
    config: PipelineConfig,
    services: VoiceServices,
    sessions: RwLock<HashMap<String, Arc<VoiceSession>>>,
    root: CancellationToken,
}

impl VoiceManager {
    /// Manager with no sessions
    pub fn new(config: PipelineConfig, services: VoiceServices) -> Self {
        Self {
            config,
            services,
            sessions: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Parent token of every session
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Shared collaborators
    pub fn services(&self) -> &VoiceServices {
        &self.services
    }

    /// Join `channel_id` in `guild_id`
    pub async fn join(&self, guild_id: &str, channel_id: &str) -> Result<JoinOutcome> {
        let existing = self.session(guild_id);
        let mut outcome = JoinOutcome::Joined;
        if let Some(session) = existing {
            if session.channel_id() == channel_id {
                return Ok(JoinOutcome::AlreadyConnected);
            }
            outcome = JoinOutcome::Moved {
                from: session.channel_id().to_string(),
            };
            self.leave(guild_id).await;
        }

        self.services.bridge.join_channel(guild_id, channel_id).await?;

        let session = VoiceSession::start(guild_id, channel_id, self.config.clone(), &self.services, &self.root);
        self.sessions.write().insert(guild_id.to_string(), session);
        info!(guild_id, channel_id, "Joined voice channel");
        Ok(outcome)
    }

    /// Leave the session in `guild_id`; false when there was none
    pub async fn leave(&self, guild_id: &str) -> bool {
        let removed = self.sessions.write().remove(guild_id);
        match removed {
            Some(session) => {
                session.shutdown().await;
                info!(guild_id, "Left voice channel");
                true
            }
            None => false,
        }
    }

    /// Session in `guild_id`
    pub fn session(&self, guild_id: &str) -> Option<Arc<VoiceSession>> {
        self.sessions.read().get(guild_id).cloned()
    }

    /// All live sessions
    pub fn sessions(&self) -> Vec<Arc<VoiceSession>> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.guild_id().cmp(b.guild_id()));
        sessions
    }

    /// Tear down every session, returning how many there were
    pub async fn teardown_all(&self) -> usize {
        let sessions: Vec<Arc<VoiceSession>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let n = sessions.len();
        join_all(sessions.iter().map(|session| session.shutdown())).await;
        if n > 0 {
            warn!(sessions = n, "Tore down all voice sessions");
        }
        n
    }

    /// Track a member joining, leaving or muting in a session's channel
    pub fn update_voice_state(&self, guild_id: &str, user_id: &str, channel_id: Option<&str>, muted: bool) {
        let Some(session) = self.session(guild_id) else {
            return;
        };
        match channel_id {
            Some(channel) if channel == session.channel_id() => session.ssrc().member_update(user_id, muted),
            _ => session.ssrc().member_left(user_id),
        }
    }

    /// Stop everything
    pub async fn shutdown(&self) {
        self.teardown_all().await;
        self.root.cancel();
    }

    fn route(&self, frame: &PcmFrame) -> Option<(Arc<VoiceSession>, String)> {
        let sessions = self.sessions.read();

        if parse_ssrc_tag(&frame.source_id).is_some() {
            return sessions
                .values()
                .find_map(|s| s.resolve_source(&frame.source_id).map(|user| (s.clone(), user)));
        }

        let owner = sessions
            .values()
            .find(|s| s.ssrc().is_member(&frame.source_id))
            .or_else(|| {
                if sessions.len() == 1 {
                    sessions.values().next()
                } else {
                    None
                }
            })?;
        Some((owner.clone(), frame.source_id.clone()))
    }
}

impl FrameSink for VoiceManager {
    fn deliver(&self, frame: PcmFrame) {
        match self.route(&frame) {
            Some((session, user_id)) => session.deliver(&user_id, frame.samples),
            None => trace!(source = %frame.source_id, "Dropping unattributed frame"),
        }
    }
}
