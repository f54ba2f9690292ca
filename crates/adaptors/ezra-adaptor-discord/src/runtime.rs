//! Startup and wiring of the voice subsystem

use ezra_core::{AgentOrchestrator, Result, VoiceSettings};
use ezra_provider_voice::{
    spawn_warmup, FfmpegTranscoder, ReferenceStore, SttClient, TtsClient, WarmupPolicy, WarmupReport,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{BackoffPolicy, BridgeClient};
use crate::gateway::{GatewayForwarder, GatewaySink};
use crate::ingress::AudioIngress;
use crate::playback::PlaybackDispatcher;
use crate::session::{PipelineConfig, VoiceManager, VoiceServices};
use crate::tools::VoiceToolExecutor;

/// Startup knobs that do not come from the environment
#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Agent answering in voice
    pub agent_id: String,
    /// The bot's own Discord user id
    pub bot_user_id: String,
    /// Bridge connection retry policy
    pub bridge_backoff: BackoffPolicy,
    /// STT/TTS warmup policy
    pub warmup: WarmupPolicy,
}

impl StartupOptions {
    /// Defaults for `agent_id` running as `bot_user_id`
    pub fn new(agent_id: impl Into<String>, bot_user_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            bot_user_id: bot_user_id.into(),
            bridge_backoff: BackoffPolicy::default(),
            warmup: WarmupPolicy::default(),
        }
    }
}

/// A running voice subsystem
pub struct VoiceRuntime {
    manager: Arc<VoiceManager>,
    bridge: Arc<BridgeClient>,
    forwarder: Arc<GatewayForwarder>,
    tools: VoiceToolExecutor,
    bot_user_id: String,
    audio_addr: SocketAddr,
    warmup: Option<JoinHandle<WarmupReport>>,
    background: Vec<JoinHandle<()>>,
}

impl VoiceRuntime {
    /// Connect to the bridge and start listening for audio
    ///
    /// The bridge is probed first; when it never answers this returns
    /// `BridgeUnavailable` before any socket is bound or task spawned.
    pub async fn start(
        settings: &VoiceSettings,
        options: StartupOptions,
        agent: Arc<dyn AgentOrchestrator>,
        gateway: Arc<dyn GatewaySink>,
    ) -> Result<Self> {
        let forwarder = Arc::new(GatewayForwarder::new(gateway));
        let bridge = Arc::new(
            BridgeClient::connect(&settings.bridge_url, options.bridge_backoff, forwarder.handler()).await?,
        );

        let transcoder = Arc::new(FfmpegTranscoder::new(settings.ffmpeg_path.clone()));
        let references = Arc::new(ReferenceStore::open(settings.reference_dir.clone(), transcoder).await?);
        if !references.has_default() {
            warn!(dir = %references.dir().display(), "No default voice reference found");
        }

        let tts = Arc::new(TtsClient::new(settings.tts_url.clone()));
        let playback = Arc::new(PlaybackDispatcher::new(bridge.clone(), tts, settings.tts_streaming));
        let services = VoiceServices {
            bridge: bridge.clone(),
            transcriber: Arc::new(SttClient::new(settings.stt_url.clone())),
            agent,
            references,
            playback,
        };
        let manager = Arc::new(VoiceManager::new(
            PipelineConfig::from_settings(settings, options.agent_id),
            services,
        ));

        let ingress = match AudioIngress::bind(settings.audio_port).await {
            Ok(ingress) => ingress,
            Err(e) => {
                bridge.close();
                return Err(e);
            }
        };
        let audio_addr = ingress.local_addr()?;
        let mut background = vec![tokio::spawn(ingress.run(manager.clone(), manager.root_token()))];

        background.push(tokio::spawn(watch_bridge(bridge.clone(), manager.clone())));

        let warmup = spawn_warmup(settings.stt_url.clone(), settings.tts_url.clone(), options.warmup);

        info!(
            bridge = %settings.bridge_url,
            audio = %audio_addr,
            streaming = settings.tts_streaming,
            "Voice subsystem started"
        );

        Ok(Self {
            tools: VoiceToolExecutor::new(manager.clone()),
            manager,
            bridge,
            forwarder,
            bot_user_id: options.bot_user_id,
            audio_addr,
            warmup: Some(warmup),
            background,
        })
    }

    /// Session registry
    pub fn manager(&self) -> &Arc<VoiceManager> {
        &self.manager
    }

    /// Bridge connection
    pub fn bridge(&self) -> &Arc<BridgeClient> {
        &self.bridge
    }

    /// Forwarder writing bridge payloads to the gateway
    pub fn forwarder(&self) -> &Arc<GatewayForwarder> {
        &self.forwarder
    }

    /// Voice tool handlers
    pub fn tools(&self) -> &VoiceToolExecutor {
        &self.tools
    }

    /// UDP address receiving bridge audio
    pub fn audio_addr(&self) -> SocketAddr {
        self.audio_addr
    }

    /// Wait for the startup warmup to finish
    ///
    /// Returns `None` if it was already awaited.
    pub async fn warmup_report(&mut self) -> Option<WarmupReport> {
        let handle = self.warmup.take()?;
        handle.await.ok()
    }

    /// Handle a gateway `VOICE_SERVER_UPDATE` dispatch
    pub async fn on_voice_server_update(&self, event: Value) -> Result<()> {
        self.bridge.send_voice_server_update(event).await
    }

    /// Handle a gateway `VOICE_STATE_UPDATE` dispatch
    ///
    /// Membership is tracked for SSRC attribution; the event is also
    /// proxied to the bridge when it concerns the bot itself.
    pub async fn on_voice_state_update(&self, event: Value) -> Result<()> {
        let field = |key: &str| event.get(key).and_then(Value::as_str).map(str::to_string);
        if let (Some(guild_id), Some(user_id)) = (field("guild_id"), field("user_id")) {
            if user_id != self.bot_user_id {
                let muted = ["self_mute", "mute"]
                    .iter()
                    .any(|key| event.get(*key).and_then(Value::as_bool).unwrap_or(false));
                self.manager
                    .update_voice_state(&guild_id, &user_id, field("channel_id").as_deref(), muted);
            }
        }

        let forwarded = self
            .bridge
            .send_voice_state_update(event, &self.bot_user_id)
            .await?;
        if forwarded {
            debug!("Proxied own voice state to bridge");
        }
        Ok(())
    }

    /// Tear down every session and close the bridge
    pub async fn shutdown(mut self) {
        self.manager.shutdown().await;
        self.bridge.close();
        let background: Vec<JoinHandle<()>> = self.background.drain(..).collect();
        let aborted = crate::session::join_within(background, crate::session::SHUTDOWN_GRACE).await;
        if aborted > 0 {
            debug!(aborted, "Background tasks outlived shutdown grace");
        }
        info!("Voice subsystem stopped");
    }
}

async fn watch_bridge(bridge: Arc<BridgeClient>, manager: Arc<VoiceManager>) {
    let root = manager.root_token();
    let lost = bridge.lost();
    tokio::select! {
        _ = root.cancelled() => {}
        _ = lost.cancelled() => {
            warn!(url = bridge.url(), "Voice bridge lost, tearing down sessions");
            manager.teardown_all().await;
        }
    }
}
