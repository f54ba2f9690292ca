//! Response queue and turn-taking
//!
//! Transcripts are run through the agent as they arrive; replies wait in a
//! priority queue. A 500 ms ticker pops the head only when nobody has
//! spoken for a while and the cooldown since the previous reply has passed,
//! so the bot never talks over people. At most one TTS/playback cycle runs
//! per session.

use ezra_core::{AgentOrchestrator, EzraError, Result};
use ezra_provider_voice::ReferenceStore;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::playback::{PlaybackDispatcher, PlaybackReport};
use crate::vad::VoiceActivityDetector;

/// Words that mark an utterance as urgent
pub const URGENT_TOKENS: &[&str] = &["help", "error", "stop", "cancel", "urgent"];

/// Names the bot answers to by default
pub const DEFAULT_MENTION_TOKENS: &[&str] = &["ezra", "bot"];

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid word regex"));

// ============================================================================
// Queue
// ============================================================================

/// A reply waiting to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedResponse {
    /// User being answered
    pub user_id: String,
    /// Reply text
    pub text: String,
    /// Higher is spoken first
    pub priority: i32,
    /// When it was queued
    pub timestamp: Instant,
}

/// Bounded priority queue of replies
///
/// Kept sorted on insert: higher priority first, then older first.
pub struct ResponseQueue {
    items: Mutex<Vec<QueuedResponse>>,
    max_size: usize,
}

impl ResponseQueue {
    /// Queue admitting at most `max_size` items
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            max_size,
        }
    }

    /// Insert in order, failing when full
    pub fn push(&self, item: QueuedResponse) -> Result<()> {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            return Err(EzraError::QueueFull {
                limit: self.max_size,
            });
        }
        let at = items
            .iter()
            .position(|queued| {
                queued.priority < item.priority
                    || (queued.priority == item.priority && queued.timestamp > item.timestamp)
            })
            .unwrap_or(items.len());
        items.insert(at, item);
        Ok(())
    }

    /// Remove the head
    pub fn pop(&self) -> Option<QueuedResponse> {
        let mut items = self.items.lock();
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    /// Look at the head
    pub fn peek(&self) -> Option<QueuedResponse> {
        self.items.lock().first().cloned()
    }

    /// Queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop everything, returning how many items were discarded
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }
}

// ============================================================================
// Priority
// ============================================================================

fn words(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether `token` appears in `words` as whole words
fn contains_words(words: &[String], token: &str) -> bool {
    let needle = self::words(token);
    !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Priority of a reply to `utterance`
///
/// Base 1, +3 when it names the bot, +2 when it ends with `?`, +1 when it
/// contains an urgent word. Names and urgent words match whole words only.
pub fn compute_priority(utterance: &str, mention_tokens: &[String]) -> i32 {
    let words = words(utterance);
    let mut priority = 1;

    if mention_tokens.iter().any(|name| contains_words(&words, name)) {
        priority += 3;
    }
    if utterance.trim_end().ends_with('?') {
        priority += 2;
    }
    if URGENT_TOKENS.iter().any(|token| contains_words(&words, token)) {
        priority += 1;
    }

    priority
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Turn-taking configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Agent answering in this session
    pub agent_id: String,
    /// Queue capacity
    pub max_queue_size: usize,
    /// Minimum gap between the starts of two replies
    pub cooldown: Duration,
    /// How long everyone must have been quiet before the bot speaks
    pub quiet_window: Duration,
    /// Dispatch ticker period
    pub tick: Duration,
    /// Lowercase names that count as addressing the bot
    pub mention_tokens: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_id: "ezra".to_string(),
            max_queue_size: 10,
            cooldown: Duration::from_secs(2),
            quiet_window: Duration::from_secs(2),
            tick: Duration::from_millis(500),
            mention_tokens: DEFAULT_MENTION_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct OrchestratorState {
    is_responding: bool,
    last_response_at: Option<Instant>,
}

/// Per-session turn orchestrator
pub struct VoiceOrchestrator {
    guild_id: String,
    config: OrchestratorConfig,
    queue: ResponseQueue,
    state: Mutex<OrchestratorState>,
    vad: Arc<VoiceActivityDetector>,
    agent: Arc<dyn AgentOrchestrator>,
    references: Arc<ReferenceStore>,
    playback: Arc<PlaybackDispatcher>,
}

impl VoiceOrchestrator {
    /// Orchestrator for `guild_id`
    pub fn new(
        guild_id: impl Into<String>,
        config: OrchestratorConfig,
        vad: Arc<VoiceActivityDetector>,
        agent: Arc<dyn AgentOrchestrator>,
        references: Arc<ReferenceStore>,
        playback: Arc<PlaybackDispatcher>,
    ) -> Self {
        let queue = ResponseQueue::new(config.max_queue_size);
        Self {
            guild_id: guild_id.into(),
            config,
            queue,
            state: Mutex::new(OrchestratorState::default()),
            vad,
            agent,
            references,
            playback,
        }
    }

    /// Pending replies
    pub fn queue(&self) -> &ResponseQueue {
        &self.queue
    }

    /// Whether a TTS/playback cycle is in flight
    pub fn is_responding(&self) -> bool {
        self.state.lock().is_responding
    }

    /// Run an agent turn for a transcript and queue the reply
    ///
    /// Returns the queued priority, or `None` when the agent stayed quiet.
    pub async fn handle_transcript(&self, user_id: &str, text: &str) -> Result<Option<i32>> {
        let turn = self.agent.run_turn(&self.config.agent_id, user_id, text).await?;
        if turn.is_ignored() || turn.content().trim().is_empty() {
            debug!(guild_id = %self.guild_id, user_id, "Agent chose not to reply");
            return Ok(None);
        }

        let priority = compute_priority(text, &self.config.mention_tokens);
        self.queue.push(QueuedResponse {
            user_id: user_id.to_string(),
            text: turn.content().to_string(),
            priority,
            timestamp: Instant::now(),
        })?;
        debug!(guild_id = %self.guild_id, user_id, priority, "Queued voice response");
        Ok(Some(priority))
    }

    /// Whether the head of the queue may be spoken at `now`
    pub fn should_respond(&self, now: Instant) -> bool {
        let state = self.state.lock();
        if state.is_responding {
            return false;
        }
        if let Some(last) = state.last_response_at {
            if now.saturating_duration_since(last) < self.config.cooldown {
                return false;
            }
        }
        if self.queue.is_empty() {
            return false;
        }
        self.vad
            .active_users_at(self.config.quiet_window, now)
            .is_empty()
    }

    /// Pop the head and mark a cycle in flight, if allowed
    pub fn begin_cycle(&self, now: Instant) -> Option<QueuedResponse> {
        if !self.should_respond(now) {
            return None;
        }
        let item = self.queue.pop()?;
        let mut state = self.state.lock();
        state.is_responding = true;
        state.last_response_at = Some(now);
        Some(item)
    }

    fn end_cycle(&self) {
        self.state.lock().is_responding = false;
    }

    /// Synthesize and play one reply, aborting on `cancel`
    pub async fn run_cycle(&self, item: QueuedResponse, cancel: &CancellationToken) -> Result<PlaybackReport> {
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EzraError::Cancelled),
            r = self.speak(&item) => r,
        };
        self.end_cycle();
        result
    }

    async fn speak(&self, item: &QueuedResponse) -> Result<PlaybackReport> {
        let reference = self.references.get_reference(&item.user_id)?;
        self.playback.speak(&self.guild_id, &item.text, &reference).await
    }

    /// Dispatch loop; returns when `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(item) = self.begin_cycle(Instant::now()) else {
                continue;
            };

            info!(
                guild_id = %self.guild_id,
                user_id = %item.user_id,
                priority = item.priority,
                "Speaking queued response"
            );
            match self.run_cycle(item, &cancel).await {
                Ok(report) => debug!(guild_id = %self.guild_id, bytes = report.bytes, "Response cycle complete"),
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(guild_id = %self.guild_id, error = %e, kind = e.kind(), "Response cycle failed"),
            }
        }

        let dropped = self.queue.clear();
        debug!(guild_id = %self.guild_id, dropped, "Orchestrator stopped");
    }
}
