//! Mimic tool handlers

use crate::analyzer::StyleAnalyzer;
use crate::scheduler::MimicScheduler;
use crate::state::MimicRegistry;
use ezra_core::{ChannelDirectory, ExecutionContext, PersonalityRepository, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Tool names handled here
pub const MIMIC_TOOLS: &[&str] = &["mimic_personality", "revert_personality", "analyze_user_style"];

/// Messages analyzed when mimicking
pub const MIMIC_MESSAGE_FLOOR: usize = 300;
/// Messages analyzed for a plain style report
pub const ANALYZE_MESSAGE_COUNT: usize = 100;

/// Executes mimic tools for an agent
pub struct MimicToolExecutor {
    analyzer: StyleAnalyzer,
    repository: Arc<dyn PersonalityRepository>,
    registry: Arc<MimicRegistry>,
    scheduler: Option<Arc<MimicScheduler>>,
    admin_user_id: Option<String>,
}

impl MimicToolExecutor {
    /// Create an executor without a background poster
    pub fn new(
        directory: Arc<dyn ChannelDirectory>,
        repository: Arc<dyn PersonalityRepository>,
        registry: Arc<MimicRegistry>,
    ) -> Self {
        Self {
            analyzer: StyleAnalyzer::new(directory, repository.clone()),
            repository,
            registry,
            scheduler: None,
            admin_user_id: None,
        }
    }

    /// Only `admin_user_id` may mimic users other than themselves
    pub fn with_admin(mut self, admin_user_id: Option<String>) -> Self {
        self.admin_user_id = admin_user_id;
        self
    }

    /// Start and stop `scheduler` with mimic mode
    pub fn with_scheduler(mut self, scheduler: Arc<MimicScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Shared mimic state
    pub fn registry(&self) -> &Arc<MimicRegistry> {
        &self.registry
    }

    /// Whether `name` is a mimic tool
    pub fn handles(name: &str) -> bool {
        MIMIC_TOOLS.contains(&name)
    }

    /// Run the tool `name`
    pub async fn execute(&self, name: &str, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        match name {
            "mimic_personality" => self.mimic(ctx, args).await,
            "revert_personality" => self.revert(ctx).await,
            "analyze_user_style" => self.analyze(ctx, args).await,
            other => ToolResult::failure(format!("Unknown mimic tool: {other}")),
        }
    }

    async fn mimic(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let Some(user_id) = str_arg(args, "user_id") else {
            return ToolResult::failure("user_id is required");
        };
        if let Some(admin) = &self.admin_user_id {
            if ctx.user_id != *admin && ctx.user_id != user_id {
                return ToolResult::failure("Unauthorized: only the administrator can mimic other users");
            }
        }
        let force = flag_arg(args, "update");

        let current = self.registry.snapshot(&ctx.agent_id);
        if !force && current.target() == Some(user_id) {
            let profile = current.profile.unwrap_or_default();
            info!(agent_id = %ctx.agent_id, user_id = %user_id, "Already mimicking this user");
            return ToolResult::ok_with_data(
                Some(format!(
                    "You are already mimicking {}'s personality. Respond naturally in their style.",
                    profile.username
                )),
                json!({
                    "mimicking": profile.username,
                    "messages_analyzed": profile.message_count,
                    "already_active": true,
                }),
            );
        }

        let Some(channel_id) = str_arg(args, "channel_id").or(non_empty(&ctx.channel_id)) else {
            return ToolResult::failure("channel_id is required for personality analysis");
        };
        let message_count = args
            .get("message_count")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).max(MIMIC_MESSAGE_FLOOR))
            .unwrap_or(MIMIC_MESSAGE_FLOOR);

        let original = match self.repository.fetch_agent_personality(&ctx.agent_id).await {
            Ok(personality) => personality,
            Err(e) => {
                warn!(agent_id = %ctx.agent_id, error = %e, "Could not load current personality");
                String::new()
            }
        };

        let profile = match self
            .analyzer
            .analyze(channel_id, user_id, message_count, force)
            .await
        {
            Ok(profile) => profile,
            Err(e) => return ToolResult::failure(format!("Failed to analyze personality: {e}")),
        };

        let message = format!(
            "Now mimicking {}'s personality based on {} messages. Use revert_personality to stop.",
            profile.username, profile.message_count
        );
        let data = json!({
            "mimicking": profile.username,
            "messages_analyzed": profile.message_count,
            "style": profile.tone_indicators,
            "capitalization": profile.capitalization,
            "avg_message_length": profile.avg_message_length,
        });

        info!(
            agent_id = %ctx.agent_id,
            user_id = %user_id,
            messages = profile.message_count,
            "Mimic mode activated"
        );
        self.registry.activate(&ctx.agent_id, original, profile);
        if let Some(scheduler) = &self.scheduler {
            scheduler.start(&ctx.agent_id);
        }

        ToolResult::ok_with_data(Some(message), data)
    }

    async fn revert(&self, ctx: &ExecutionContext) -> ToolResult {
        let Some(state) = self.registry.deactivate(&ctx.agent_id) else {
            return ToolResult::ok("Not currently mimicking anyone.");
        };
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop(&ctx.agent_id);
        }

        if let Err(e) = self
            .repository
            .update_agent_personality(&ctx.agent_id, &state.original_personality)
            .await
        {
            warn!(agent_id = %ctx.agent_id, error = %e, "Failed to restore original personality");
        }

        let username = state.profile.map(|p| p.username).unwrap_or_default();
        info!(agent_id = %ctx.agent_id, was_mimicking = %username, "Mimic mode deactivated");
        ToolResult::ok(format!("Stopped mimicking {username}. Reverted to original personality."))
    }

    async fn analyze(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let Some(user_id) = str_arg(args, "user_id") else {
            return ToolResult::failure("user_id is required");
        };
        let Some(channel_id) = str_arg(args, "channel_id").or(non_empty(&ctx.channel_id)) else {
            return ToolResult::failure("channel_id is required");
        };

        match self
            .analyzer
            .analyze(channel_id, user_id, ANALYZE_MESSAGE_COUNT, false)
            .await
        {
            Ok(profile) => ToolResult::ok_with_data(
                Some(format!(
                    "Analyzed {} messages from {}",
                    profile.message_count, profile.username
                )),
                json!({
                    "username": profile.username,
                    "messages_analyzed": profile.message_count,
                    "avg_message_length": profile.avg_message_length,
                    "capitalization": profile.capitalization,
                    "punctuation": profile.punctuation_style,
                    "tone": profile.tone_indicators,
                    "common_words": profile.common_words,
                    "emoji_usage": profile.emoji_usage,
                    "sample_messages": profile.sample_messages,
                }),
            ),
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).and_then(non_empty)
}

fn flag_arg(args: &Value, key: &str) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezra_core::testing::{InMemoryRepository, RecordingDirectory};

    fn executor() -> MimicToolExecutor {
        MimicToolExecutor::new(
            Arc::new(RecordingDirectory::new()),
            Arc::new(InMemoryRepository::new()),
            Arc::new(MimicRegistry::new()),
        )
    }

    fn ctx(user: &str) -> ExecutionContext {
        ExecutionContext {
            agent_id: "ezra".to_string(),
            user_id: user.to_string(),
            channel_id: "c1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_revert_when_idle() {
        let result = tokio_test::block_on(executor().execute("revert_personality", &ctx("u1"), &json!({})));
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("Not currently mimicking anyone."));
    }

    #[test]
    fn test_argument_errors() {
        let tools = executor().with_admin(Some("admin".to_string()));
        let missing = tokio_test::block_on(tools.execute("mimic_personality", &ctx("u1"), &json!({})));
        assert_eq!(missing.error.as_deref(), Some("user_id is required"));

        let other = tokio_test::block_on(tools.execute(
            "mimic_personality",
            &ctx("u1"),
            &json!({"user_id": "u2"}),
        ));
        assert!(other.error.unwrap().starts_with("Unauthorized"));

        let unknown = tokio_test::block_on(tools.execute("clone_me", &ctx("u1"), &json!({})));
        assert_eq!(unknown.error.as_deref(), Some("Unknown mimic tool: clone_me"));
    }

    #[test]
    fn test_flag_arg() {
        assert!(flag_arg(&json!({"update": true}), "update"));
        assert!(flag_arg(&json!({"update": "1"}), "update"));
        assert!(!flag_arg(&json!({"update": "yes"}), "update"));
        assert!(!flag_arg(&json!({}), "update"));
    }

    #[test]
    fn test_handles() {
        assert!(MimicToolExecutor::handles("revert_personality"));
        assert!(!MimicToolExecutor::handles("voice_status"));
    }
}
