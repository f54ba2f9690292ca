//! Shared data types and the contracts of external collaborators
//!
//! The LLM, the knowledge-graph repository, web search and the Discord text
//! surface live outside this workspace. The voice pipeline and the mimic
//! poster only talk to them through the traits below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

// ============================================================================
// Tool results
// ============================================================================

/// Structured result returned by every tool handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool did what was asked
    pub success: bool,
    /// Human-readable outcome on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// One-sentence human reason on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool-specific payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// Successful result with a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Successful result carrying data
    pub fn ok_with_data(message: Option<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message,
            error: None,
            data: Some(data),
        }
    }

    /// Failed result with a reason
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Who invoked a tool and from where
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Agent the tool runs for
    pub agent_id: String,
    /// Calling user
    pub user_id: String,
    /// Text channel the call came from
    pub channel_id: String,
    /// Guild of that channel, empty in DMs
    pub guild_id: String,
}

// ============================================================================
// Agent orchestrator
// ============================================================================

/// Outcome of one agent turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    content: String,
    ignored: bool,
}

impl TurnResult {
    /// A turn that produced a reply
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ignored: false,
        }
    }

    /// A turn the agent chose not to answer
    pub fn ignored() -> Self {
        Self {
            content: String::new(),
            ignored: true,
        }
    }

    /// Reply text
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether the agent declined to answer
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }
}

/// Runs one LLM turn for a user message
#[async_trait]
pub trait AgentOrchestrator: Send + Sync {
    /// Process `text` from `user_id` on behalf of `agent_id`
    async fn run_turn(&self, agent_id: &str, user_id: &str, text: &str) -> Result<TurnResult>;
}

// ============================================================================
// Language model and search
// ============================================================================

/// Plain text generation without tools
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt` under `system_prompt`
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<String>;
}

/// One web search hit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Page title
    pub title: String,
    /// Page URL
    pub url: String,
    /// Short excerpt
    pub snippet: String,
}

/// Web search collaborator
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search for `query`, returning at most `limit` results
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

// ============================================================================
// Repository
// ============================================================================

/// An approved fact or opinion about a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityMemory {
    /// Memory identifier
    pub id: String,
    /// User the memory is about
    pub user_id: String,
    /// Memory text
    pub content: String,
    /// Where it was learned
    pub source: String,
}

/// A memory to be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPersonalityMemory {
    /// User the memory is about
    pub user_id: String,
    /// Memory text
    pub content: String,
    /// Where it was learned
    pub source: String,
    /// Channel it came from
    pub channel_id: String,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Whether the user consented to storage
    pub consented: bool,
}

/// Knowledge-graph operations used by the style-profile engine and mimic mode
#[async_trait]
pub trait PersonalityRepository: Send + Sync {
    /// Memories about `user_id` relevant to `query`
    async fn retrieve_personality_memories(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PersonalityMemory>>;

    /// Store a memory, returning its identifier
    async fn store_personality_memory(&self, memory: NewPersonalityMemory) -> Result<String>;

    /// Cached profile JSON for `(user_id, guild_id)`
    async fn get_personality_profile(&self, user_id: &str, guild_id: &str) -> Result<Option<String>>;

    /// Cache profile JSON under `(user_id, guild_id)`
    async fn store_personality_profile(
        &self,
        user_id: &str,
        guild_id: &str,
        profile_json: &str,
    ) -> Result<()>;

    /// The agent's current personality text
    async fn fetch_agent_personality(&self, agent_id: &str) -> Result<String>;

    /// Replace the agent's personality text
    async fn update_agent_personality(&self, agent_id: &str, personality: &str) -> Result<()>;
}

// ============================================================================
// Discord text surface
// ============================================================================

/// A text message as seen by the mimic subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message identifier
    pub id: String,
    /// Channel it was posted in
    pub channel_id: String,
    /// Author identifier
    pub author_id: String,
    /// Author display name
    pub author_name: String,
    /// Whether the author is a bot account
    pub author_is_bot: bool,
    /// Message text
    pub content: String,
    /// When it was posted
    pub timestamp: DateTime<Utc>,
}

/// Discord text operations consumed by the mimic subsystem
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Guild owning the channel, `None` for DMs
    async fn channel_guild(&self, channel_id: &str) -> Result<Option<String>>;

    /// Up to `limit` recent messages written by `user_id`
    async fn fetch_user_messages(
        &self,
        channel_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>>;

    /// Display name for a user
    async fn username(&self, user_id: &str) -> Result<String>;

    /// Post `content` to a channel
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_serialization() {
        let result = ToolResult::failure("Not connected to voice in this guild");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Not connected to voice in this guild");
        assert!(json.get("message").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_turn_result_accessors() {
        let turn = TurnResult::reply("It is 10:00.");
        assert_eq!(turn.content(), "It is 10:00.");
        assert!(!turn.is_ignored());
        assert!(TurnResult::ignored().is_ignored());
    }
}
