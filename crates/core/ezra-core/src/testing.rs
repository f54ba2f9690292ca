//! In-memory collaborator doubles for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::types::*;
use crate::{EzraError, Result};

/// Repository backed by hash maps
#[derive(Default)]
pub struct InMemoryRepository {
    memories: Mutex<Vec<PersonalityMemory>>,
    profiles: Mutex<HashMap<(String, String), String>>,
    personalities: Mutex<HashMap<String, String>>,
    profile_writes: Mutex<usize>,
}

impl InMemoryRepository {
    /// Empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an approved memory
    pub fn add_memory(&self, user_id: &str, content: &str) {
        let mut memories = self.memories.lock();
        let id = format!("mem-{}", memories.len() + 1);
        memories.push(PersonalityMemory {
            id,
            user_id: user_id.to_string(),
            content: content.to_string(),
            source: "seed".to_string(),
        });
    }

    /// Seed an agent personality
    pub fn set_personality(&self, agent_id: &str, personality: &str) {
        self.personalities
            .lock()
            .insert(agent_id.to_string(), personality.to_string());
    }

    /// All memories stored for a user
    pub fn memories_for(&self, user_id: &str) -> Vec<PersonalityMemory> {
        self.memories
            .lock()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Raw cached profile JSON
    pub fn cached_profile(&self, user_id: &str, guild_id: &str) -> Option<String> {
        self.profiles
            .lock()
            .get(&(user_id.to_string(), guild_id.to_string()))
            .cloned()
    }

    /// Number of profile cache writes so far
    pub fn profile_writes(&self) -> usize {
        *self.profile_writes.lock()
    }
}

#[async_trait]
impl PersonalityRepository for InMemoryRepository {
    async fn retrieve_personality_memories(
        &self,
        user_id: &str,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<PersonalityMemory>> {
        Ok(self.memories_for(user_id).into_iter().take(limit).collect())
    }

    async fn store_personality_memory(&self, memory: NewPersonalityMemory) -> Result<String> {
        let mut memories = self.memories.lock();
        let id = format!("mem-{}", memories.len() + 1);
        memories.push(PersonalityMemory {
            id: id.clone(),
            user_id: memory.user_id,
            content: memory.content,
            source: memory.source,
        });
        Ok(id)
    }

    async fn get_personality_profile(&self, user_id: &str, guild_id: &str) -> Result<Option<String>> {
        Ok(self.cached_profile(user_id, guild_id))
    }

    async fn store_personality_profile(
        &self,
        user_id: &str,
        guild_id: &str,
        profile_json: &str,
    ) -> Result<()> {
        self.profiles.lock().insert(
            (user_id.to_string(), guild_id.to_string()),
            profile_json.to_string(),
        );
        *self.profile_writes.lock() += 1;
        Ok(())
    }

    async fn fetch_agent_personality(&self, agent_id: &str) -> Result<String> {
        Ok(self
            .personalities
            .lock()
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_agent_personality(&self, agent_id: &str, personality: &str) -> Result<()> {
        self.set_personality(agent_id, personality);
        Ok(())
    }
}

/// Language model that replays scripted answers in order
///
/// Once the script is exhausted every call returns the fallback.
pub struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: String,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    /// Model answering `fallback` to everything
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful answer
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(text.into()));
        self
    }

    /// Queue a failure
    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        self.script.lock().push_back(Err(reason.into()));
        self
    }

    /// `(system_prompt, prompt)` pairs seen so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .push((system_prompt.to_string(), prompt.to_string()));
        match self.script.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(EzraError::collaborator(reason)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Search returning a fixed result list
#[derive(Default)]
pub struct StaticSearch {
    results: Vec<SearchResult>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    /// Search that always returns `results`
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    /// Search that always fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.queries.lock().push(query.to_string());
        if self.fail {
            return Err(EzraError::collaborator("search backend offline"));
        }
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

/// Channel directory with canned history that records sent messages
#[derive(Default)]
pub struct RecordingDirectory {
    guilds: Mutex<HashMap<String, String>>,
    usernames: Mutex<HashMap<String, String>>,
    history: Mutex<Vec<ChannelMessage>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a channel in a guild
    pub fn add_channel(&self, channel_id: &str, guild_id: &str) {
        self.guilds
            .lock()
            .insert(channel_id.to_string(), guild_id.to_string());
    }

    /// Register a display name
    pub fn add_user(&self, user_id: &str, username: &str) {
        self.usernames
            .lock()
            .insert(user_id.to_string(), username.to_string());
    }

    /// Append a message to the history
    pub fn add_message(&self, message: ChannelMessage) {
        self.history.lock().push(message);
    }

    /// `(channel_id, content)` pairs posted so far
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChannelDirectory for RecordingDirectory {
    async fn channel_guild(&self, channel_id: &str) -> Result<Option<String>> {
        Ok(self.guilds.lock().get(channel_id).cloned())
    }

    async fn fetch_user_messages(
        &self,
        channel_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| m.channel_id == channel_id && m.author_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn username(&self, user_id: &str) -> Result<String> {
        Ok(self
            .usernames
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string()))
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        self.sent
            .lock()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }
}

/// Orchestrator answering from a fixed table, ignoring unknown input
#[derive(Default)]
pub struct EchoOrchestrator {
    replies: HashMap<String, String>,
    turns: Mutex<Vec<(String, String)>>,
}

impl EchoOrchestrator {
    /// Orchestrator with no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply `reply` whenever the user says `utterance`
    pub fn with_reply(mut self, utterance: &str, reply: &str) -> Self {
        self.replies.insert(utterance.to_string(), reply.to_string());
        self
    }

    /// `(user_id, text)` pairs seen so far
    pub fn turns(&self) -> Vec<(String, String)> {
        self.turns.lock().clone()
    }
}

#[async_trait]
impl AgentOrchestrator for EchoOrchestrator {
    async fn run_turn(&self, _agent_id: &str, user_id: &str, text: &str) -> Result<TurnResult> {
        self.turns.lock().push((user_id.to_string(), text.to_string()));
        Ok(match self.replies.get(text) {
            Some(reply) => TurnResult::reply(reply.clone()),
            None => TurnResult::ignored(),
        })
    }
}

/// Build a channel message for tests
pub fn message(
    channel_id: &str,
    author_id: &str,
    content: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> ChannelMessage {
    ChannelMessage {
        id: uuid::Uuid::new_v4().to_string(),
        channel_id: channel_id.to_string(),
        author_id: author_id.to_string(),
        author_name: author_id.to_string(),
        author_is_bot: false,
        content: content.to_string(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_order() {
        let model = ScriptedModel::new("fallback")
            .then_reply("first")
            .then_fail("boom");

        assert_eq!(model.generate("sys", "a").await.unwrap(), "first");
        assert!(model.generate("sys", "b").await.is_err());
        assert_eq!(model.generate("sys", "c").await.unwrap(), "fallback");
        assert_eq!(model.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_repository_profile_cache() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_personality_profile("u1", "g1").await.unwrap().is_none());
        repo.store_personality_profile("u1", "g1", "{}").await.unwrap();
        assert_eq!(
            repo.get_personality_profile("u1", "g1").await.unwrap().as_deref(),
            Some("{}")
        );
        assert_eq!(repo.profile_writes(), 1);
    }
}
