//! Voice tool handlers exposed to the agent

use ezra_core::{ExecutionContext, ToolResult};
use ezra_provider_voice::DEFAULT_REFERENCE;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::session::{JoinOutcome, VoiceManager};

/// Names of the voice tools
pub const VOICE_TOOLS: &[&str] = &[
    "join_voice_channel",
    "leave_voice_channel",
    "set_voice_reference",
    "voice_status",
];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn guild_for<'a>(ctx: &'a ExecutionContext, args: &'a Value) -> Option<&'a str> {
    str_arg(args, "guild_id").or_else(|| Some(ctx.guild_id.as_str()).filter(|g| !g.is_empty()))
}

/// Dispatches voice tool calls onto the session manager
pub struct VoiceToolExecutor {
    manager: Arc<VoiceManager>,
    http: reqwest::Client,
}

impl VoiceToolExecutor {
    /// Executor driving `manager`
    pub fn new(manager: Arc<VoiceManager>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { manager, http }
    }

    /// Whether `name` is one of the voice tools
    pub fn handles(name: &str) -> bool {
        VOICE_TOOLS.contains(&name)
    }

    /// Run tool `name`
    pub async fn execute(&self, name: &str, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        match name {
            "join_voice_channel" => self.join(ctx, args).await,
            "leave_voice_channel" => self.leave(ctx, args).await,
            "set_voice_reference" => self.set_reference(ctx, args).await,
            "voice_status" => self.status(ctx, args),
            other => ToolResult::failure(format!("Unknown voice tool: {}", other)),
        }
    }

    async fn join(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let Some(guild_id) = guild_for(ctx, args) else {
            return ToolResult::failure("Could not determine guild ID");
        };
        let channel_id = str_arg(args, "channel_id")
            .or_else(|| Some(ctx.channel_id.as_str()).filter(|c| !c.is_empty()));
        let Some(channel_id) = channel_id else {
            return ToolResult::failure(
                "Could not determine voice channel. Please specify channel_id or join a voice channel first.",
            );
        };

        match self.manager.join(guild_id, channel_id).await {
            Ok(JoinOutcome::AlreadyConnected) => {
                ToolResult::ok(format!("Already connected to voice channel {}", channel_id))
            }
            Ok(JoinOutcome::Moved { from }) => {
                info!(guild_id, from = %from, to = channel_id, "Moved voice session");
                ToolResult::ok(format!("Joined voice channel {}", channel_id))
            }
            Ok(JoinOutcome::Joined) => ToolResult::ok(format!("Joined voice channel {}", channel_id)),
            Err(e) => {
                warn!(guild_id, channel_id, error = %e, "Join failed");
                ToolResult::failure(format!("Failed to join voice channel: {}", e))
            }
        }
    }

    async fn leave(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let Some(guild_id) = guild_for(ctx, args) else {
            return ToolResult::failure("Could not determine guild ID");
        };
        if self.manager.leave(guild_id).await {
            ToolResult::ok("Left voice channel")
        } else {
            ToolResult::failure("Not connected to voice in this guild")
        }
    }

    async fn set_reference(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let attachment_url = str_arg(args, "attachment_url");
        let file_path = str_arg(args, "file_path");
        let user_id = if ctx.user_id.is_empty() {
            DEFAULT_REFERENCE
        } else {
            ctx.user_id.as_str()
        };
        let references = &self.manager.services().references;

        let result = match (attachment_url, file_path) {
            (Some(url), _) => {
                let (body, content_type) = match self.download(url).await {
                    Ok(downloaded) => downloaded,
                    Err(e) => return ToolResult::failure(format!("Failed to download attachment: {}", e)),
                };
                references
                    .set_reference_from_bytes(user_id, &body, content_type.as_deref())
                    .await
            }
            (None, Some(path)) => references.set_reference_from_file(user_id, Path::new(path)).await,
            (None, None) => return ToolResult::failure("Either attachment_url or file_path must be provided"),
        };

        match result {
            Ok(path) => ToolResult::ok_with_data(
                Some("Voice reference audio set successfully".to_string()),
                json!({ "user_id": user_id, "path": path.display().to_string() }),
            ),
            Err(e) => {
                warn!(user_id, error = %e, kind = e.kind(), "Setting voice reference failed");
                ToolResult::failure(format!("Failed to set reference audio: {}", e))
            }
        }
    }

    async fn download(&self, url: &str) -> reqwest::Result<(bytes::Bytes, Option<String>)> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok((response.bytes().await?, content_type))
    }

    fn status(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        match guild_for(ctx, args) {
            Some(guild_id) => match self.manager.session(guild_id) {
                Some(session) => ToolResult::ok_with_data(None, json!(session.status())),
                None => ToolResult::ok_with_data(None, json!({ "connected": false })),
            },
            None => {
                let connections: Vec<Value> = self
                    .manager
                    .sessions()
                    .iter()
                    .map(|s| json!(s.status()))
                    .collect();
                ToolResult::ok_with_data(None, json!({ "connections": connections }))
            }
        }
    }
}
