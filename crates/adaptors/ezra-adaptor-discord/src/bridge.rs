//! Control connection to the external voice bridge
//!
//! The bridge owns the Discord voice UDP path. We talk to it over a single
//! websocket carrying `{"op": ..., "data": ...}` JSON frames: `JOIN` and
//! `PLAY` go out, `FORWARD_PAYLOAD` comes in and is handed to the gateway
//! forwarder. One task reads, one task writes; callers enqueue frames onto
//! the writer so sends are serialized.

use async_trait::async_trait;
use ezra_core::{EzraError, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound: join a voice channel
pub const OP_JOIN: &str = "JOIN";
/// Outbound: play a WAV file
pub const OP_PLAY: &str = "PLAY";
/// Outbound: proxied gateway voice server update
pub const OP_VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";
/// Outbound: proxied gateway voice state update for the bot user
pub const OP_VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
/// Inbound: gateway payload to write on the Discord socket
pub const OP_FORWARD_PAYLOAD: &str = "FORWARD_PAYLOAD";

const OUTBOUND_BUFFER: usize = 64;

/// One framed bridge message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Operation name
    pub op: String,
    /// Operation payload
    #[serde(default)]
    pub data: Value,
}

impl BridgeMessage {
    /// Build a message
    pub fn new(op: impl Into<String>, data: Value) -> Self {
        Self {
            op: op.into(),
            data,
        }
    }

    /// `JOIN` for a guild voice channel
    pub fn join(guild_id: &str, channel_id: &str) -> Self {
        Self::new(
            OP_JOIN,
            json!({
                "guildId": guild_id,
                "channelId": channel_id,
                "selfDeaf": false,
                "selfMute": false,
            }),
        )
    }

    /// `PLAY` for an absolute file path
    pub fn play(guild_id: &str, path: &Path) -> Self {
        Self::new(
            OP_PLAY,
            json!({
                "guildId": guild_id,
                "type": "file",
                "path": path.to_string_lossy(),
            }),
        )
    }
}

/// Commands the voice pipeline issues to the bridge
#[async_trait]
pub trait VoiceBridge: Send + Sync {
    /// Ask the bridge to join `channel_id` in `guild_id`
    async fn join_channel(&self, guild_id: &str, channel_id: &str) -> Result<()>;

    /// Ask the bridge to play the WAV at `path` in `guild_id`
    async fn play_audio(&self, guild_id: &str, path: &Path) -> Result<()>;
}

/// Receives inbound `FORWARD_PAYLOAD` data
pub type PayloadHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Connectivity probe schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed probe
    pub initial: Duration,
    /// Upper bound of any single delay
    pub max_delay: Duration,
    /// Probe attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        (self.initial * factor).min(self.max_delay)
    }
}

/// Dial the bridge until it answers, closing each successful probe
pub async fn probe(url: &str, policy: BackoffPolicy) -> Result<u32> {
    info!(url, "Waiting for voice bridge");

    for attempt in 1..=policy.max_attempts {
        match connect_async(url).await {
            Ok((mut ws, _)) => {
                let _ = ws.close(None).await;
                info!(attempt, "Voice bridge is available");
                return Ok(attempt);
            }
            Err(e) => {
                if attempt < policy.max_attempts {
                    let delay = policy.delay_after(attempt);
                    debug!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        retry_ms = delay.as_millis() as u64,
                        error = %e,
                        "Voice bridge not ready"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(EzraError::BridgeUnavailable {
        url: url.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Live bridge connection
pub struct BridgeClient {
    url: String,
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
    lost: CancellationToken,
    shutdown: CancellationToken,
}

impl BridgeClient {
    /// Probe the bridge, then open the control connection
    ///
    /// `on_forward` is invoked from the reader task for every
    /// `FORWARD_PAYLOAD` frame.
    pub async fn connect(url: &str, policy: BackoffPolicy, on_forward: PayloadHandler) -> Result<Self> {
        let attempts = probe(url, policy).await?;

        let (ws, _) = connect_async(url).await.map_err(|e| {
            warn!(url, error = %e, "Voice bridge refused connection after successful probe");
            EzraError::BridgeUnavailable {
                url: url.to_string(),
                attempts,
            }
        })?;
        info!(url, "Connected to voice bridge");

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let lost = CancellationToken::new();
        let shutdown = CancellationToken::new();

        // Writer
        {
            let connected = connected.clone();
            let lost = lost.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        frame = rx.recv() => {
                            let Some(frame) = frame else { break };
                            if let Err(e) = sink.send(frame).await {
                                warn!(error = %e, "Voice bridge write failed");
                                connected.store(false, Ordering::SeqCst);
                                lost.cancel();
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Reader
        {
            let connected = connected.clone();
            let lost = lost.clone();
            let shutdown = shutdown.clone();
            let outbound = tx.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = stream.next() => next,
                    };

                    match next {
                        Some(Ok(Message::Text(text))) => dispatch_inbound(&text, &on_forward),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = outbound.try_send(Message::Pong(data));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if !shutdown.is_cancelled() {
                                warn!("{}", EzraError::bridge_lost("connection closed by bridge"));
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("{}", EzraError::bridge_lost(e.to_string()));
                            break;
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
                lost.cancel();
            });
        }

        Ok(Self {
            url: url.to_string(),
            outbound: tx,
            connected,
            lost,
            shutdown,
        })
    }

    /// Bridge URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the control connection is still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Token cancelled once the connection is gone
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Enqueue a frame for the writer task
    pub async fn send(&self, message: BridgeMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(EzraError::bridge_lost("not connected"));
        }
        let text = serde_json::to_string(&message)?;
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| EzraError::bridge_lost("writer stopped"))
    }

    /// Proxy a gateway `VOICE_SERVER_UPDATE` event
    pub async fn send_voice_server_update(&self, event: Value) -> Result<()> {
        self.send(BridgeMessage::new(OP_VOICE_SERVER_UPDATE, event)).await
    }

    /// Proxy a gateway `VOICE_STATE_UPDATE` event if it concerns `bot_user_id`
    ///
    /// Returns whether the event was forwarded.
    pub async fn send_voice_state_update(&self, event: Value, bot_user_id: &str) -> Result<bool> {
        let user_id = event.get("user_id").and_then(Value::as_str).unwrap_or_default();
        if user_id != bot_user_id {
            return Ok(false);
        }
        self.send(BridgeMessage::new(OP_VOICE_STATE_UPDATE, event)).await?;
        Ok(true)
    }

    /// Close the connection
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl VoiceBridge for BridgeClient {
    async fn join_channel(&self, guild_id: &str, channel_id: &str) -> Result<()> {
        self.send(BridgeMessage::join(guild_id, channel_id)).await
    }

    async fn play_audio(&self, guild_id: &str, path: &Path) -> Result<()> {
        self.send(BridgeMessage::play(guild_id, path)).await
    }
}

fn dispatch_inbound(text: &str, on_forward: &PayloadHandler) {
    let message: BridgeMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable bridge frame");
            return;
        }
    };

    if message.op == OP_FORWARD_PAYLOAD {
        debug!("Bridge requested payload forward");
        on_forward(message.data);
    } else {
        debug!(op = %message.op, "Ignoring bridge op");
    }
}
