//! Background poster for mimic mode
//!
//! Each active agent gets two tasks: a timer loop that posts in the
//! mimicked user's style and a handler that samples channel messages and
//! replies to some of them. Both hang off a per-agent cancellation token.

use crate::profile::PersonalityProfile;
use crate::prompt::{
    clean_query, free_post_prompt, grounded_post_prompt, reply_prompt, search_query_prompt,
    QUERY_SYSTEM_PROMPT,
};
use crate::state::MimicRegistry;
use ezra_core::{ChannelDirectory, ChannelMessage, EzraError, LanguageModel, Result, WebSearch};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MESSAGE_BUFFER: usize = 64;

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Channel posts go to and replies are sampled from
    pub channel_id: String,
    /// The bot's own user id, never replied to
    pub bot_user_id: String,
    /// Shortest wait between posts
    pub min_interval: Duration,
    /// Longest wait between posts
    pub max_interval: Duration,
    /// Chance a post is grounded in a web search
    pub grounded_probability: f64,
    /// Chance an eligible channel message gets a reply
    pub reply_probability: f64,
    /// Search results requested per grounded post
    pub search_limit: usize,
}

impl SchedulerConfig {
    /// Defaults for `channel_id`
    pub fn new(channel_id: impl Into<String>, bot_user_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            bot_user_id: bot_user_id.into(),
            min_interval: Duration::from_secs(20 * 60),
            max_interval: Duration::from_secs(60 * 60),
            grounded_probability: 0.5,
            reply_probability: 0.3,
            search_limit: 1,
        }
    }
}

/// Posts and replies on behalf of mimicking agents
pub struct MimicScheduler {
    config: SchedulerConfig,
    registry: Arc<MimicRegistry>,
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn WebSearch>,
    directory: Arc<dyn ChannelDirectory>,
    rng: Mutex<StdRng>,
    messages: broadcast::Sender<ChannelMessage>,
    running: Mutex<HashMap<String, CancellationToken>>,
    root: CancellationToken,
}

impl MimicScheduler {
    /// Create a scheduler with an entropy-seeded RNG
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<MimicRegistry>,
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn WebSearch>,
        directory: Arc<dyn ChannelDirectory>,
    ) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER);
        Self {
            config,
            registry,
            model,
            search,
            directory,
            rng: Mutex::new(StdRng::from_entropy()),
            messages,
            running: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Replace the RNG with a seeded one
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Feed an incoming channel message to the reply handlers
    pub fn publish(&self, message: ChannelMessage) {
        // no receivers just means nobody is mimicking
        let _ = self.messages.send(message);
    }

    /// Start posting for `agent_id`, restarting any previous run
    pub fn start(self: &Arc<Self>, agent_id: &str) {
        let token = self.root.child_token();
        if let Some(previous) = self
            .running
            .lock()
            .insert(agent_id.to_string(), token.clone())
        {
            previous.cancel();
        }

        let receiver = self.messages.subscribe();
        tokio::spawn(self.clone().run_posts(agent_id.to_string(), token.clone()));
        tokio::spawn(self.clone().run_replies(agent_id.to_string(), receiver, token));
        info!(agent_id = %agent_id, channel_id = %self.config.channel_id, "Mimic scheduler started");
    }

    /// Stop posting for `agent_id`; returns whether it was running
    pub fn stop(&self, agent_id: &str) -> bool {
        match self.running.lock().remove(agent_id) {
            Some(token) => {
                let was_running = !token.is_cancelled();
                token.cancel();
                if was_running {
                    info!(agent_id = %agent_id, "Mimic scheduler stopped");
                }
                was_running
            }
            None => false,
        }
    }

    /// Whether tasks are live for `agent_id`
    pub fn is_running(&self, agent_id: &str) -> bool {
        self.running
            .lock()
            .get(agent_id)
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }

    /// Stop every agent
    pub fn shutdown(&self) {
        self.root.cancel();
        self.running.lock().clear();
    }

    /// Random wait before the next post
    pub fn next_interval(&self) -> Duration {
        let (min, max) = (self.config.min_interval, self.config.max_interval);
        if max <= min {
            return min;
        }
        let secs = self.rng.lock().gen_range(min.as_secs_f64()..max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn roll(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    /// Whether `message` is eligible for a reply and wins the draw
    ///
    /// Only messages in the mimic channel from humans other than the bot
    /// with non-blank content are eligible.
    pub fn should_reply(&self, message: &ChannelMessage) -> bool {
        if message.channel_id != self.config.channel_id
            || message.author_is_bot
            || message.author_id == self.config.bot_user_id
            || message.content.trim().is_empty()
        {
            return false;
        }
        self.roll() < self.config.reply_probability
    }

    /// Make one post for `agent_id`
    ///
    /// Returns `None` when the agent is no longer mimicking anyone.
    pub async fn post_once(&self, agent_id: &str) -> Result<Option<String>> {
        let Some(profile) = self.registry.active_profile(agent_id) else {
            return Ok(None);
        };

        let grounded = self.roll() < self.config.grounded_probability;
        let content = if grounded {
            match self.grounded_post(&profile).await {
                Ok(post) => post,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Grounded post failed, posting freely");
                    self.free_post(&profile).await
                }
            }
        } else {
            self.free_post(&profile).await
        };

        self.directory
            .send_message(&self.config.channel_id, &content)
            .await?;
        info!(
            agent_id = %agent_id,
            channel_id = %self.config.channel_id,
            grounded,
            "Mimic post sent"
        );
        Ok(Some(content))
    }

    /// Reply to `message` if the draw says so
    pub async fn handle_message(&self, agent_id: &str, message: &ChannelMessage) -> Result<Option<String>> {
        let Some(profile) = self.registry.active_profile(agent_id) else {
            return Ok(None);
        };
        if !self.should_reply(message) {
            return Ok(None);
        }

        let prompt = reply_prompt(&profile, &message.content, &message.author_name);
        let reply = self.model.generate(&profile.style_prompt, &prompt).await?;
        let reply = match reply.trim() {
            "" => profile.top_phrase().unwrap_or("interesting").to_string(),
            text => text.to_string(),
        };

        self.directory
            .send_message(&self.config.channel_id, &reply)
            .await?;
        debug!(agent_id = %agent_id, message_id = %message.id, "Mimic reply sent");
        Ok(Some(reply))
    }

    async fn grounded_post(&self, profile: &PersonalityProfile) -> Result<String> {
        let raw = self
            .model
            .generate(QUERY_SYSTEM_PROMPT, &search_query_prompt(profile))
            .await?;
        let mut query = clean_query(&raw);
        if query.is_empty() {
            query = match profile.top_word() {
                Some(word) => format!("{word} news"),
                None => "interesting news".to_string(),
            };
        }

        let hit = self
            .search
            .search(&query, self.config.search_limit)
            .await?
            .into_iter()
            .next()
            .filter(|r| !r.title.is_empty() && !r.url.is_empty())
            .ok_or_else(|| EzraError::collaborator(format!("no usable search result for '{query}'")))?;
        debug!(query = %query, url = %hit.url, "Mimic search result");

        let post = self
            .model
            .generate(&profile.style_prompt, &grounded_post_prompt(profile, &hit))
            .await?;
        let post = post.trim();
        Ok(if post.is_empty() {
            format!("{}\n{}", hit.title, hit.url)
        } else if !post.contains(&hit.url) {
            format!("{post}\n{}", hit.url)
        } else {
            post.to_string()
        })
    }

    async fn free_post(&self, profile: &PersonalityProfile) -> String {
        let generated = match self
            .model
            .generate(&profile.style_prompt, &free_post_prompt(profile))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(user_id = %profile.user_id, error = %e, "Free post generation failed");
                String::new()
            }
        };
        if !generated.is_empty() {
            return generated;
        }

        if let Some(phrase) = profile.top_phrase() {
            format!("{phrase}...")
        } else if let Some(word) = profile.top_word() {
            format!("{word} is interesting")
        } else {
            "hmm".to_string()
        }
    }

    async fn run_posts(self: Arc<Self>, agent_id: String, token: CancellationToken) {
        loop {
            let wait = self.next_interval();
            debug!(agent_id = %agent_id, wait_secs = wait.as_secs(), "Mimic scheduler sleeping");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if !self.registry.is_active(&agent_id) {
                info!(agent_id = %agent_id, "Mimic mode no longer active, scheduler exiting");
                token.cancel();
                break;
            }
            if let Err(e) = self.post_once(&agent_id).await {
                warn!(agent_id = %agent_id, error = %e, "Mimic post failed");
            }
        }
    }

    async fn run_replies(
        self: Arc<Self>,
        agent_id: String,
        mut receiver: broadcast::Receiver<ChannelMessage>,
        token: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                received = receiver.recv() => received,
            };
            match message {
                Ok(message) => {
                    if let Err(e) = self.handle_message(&agent_id, &message).await {
                        warn!(agent_id = %agent_id, error = %e, "Mimic reply failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(agent_id = %agent_id, skipped, "Mimic reply handler lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
