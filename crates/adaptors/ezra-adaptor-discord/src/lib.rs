//! Discord voice pipeline for Ezra
//!
//! Voice transport is delegated to an out-of-process bridge that owns the
//! Discord voice UDP path and the Opus codec. This crate:
//!
//! - talks to the bridge over a JSON websocket ([`bridge`]) and writes the
//!   gateway payloads it asks for ([`gateway`])
//! - receives decoded PCM over UDP ([`ingress`]) and attributes it to
//!   speakers ([`ssrc`])
//! - detects speech per speaker ([`vad`]) and cuts segments for STT
//!   ([`segment`])
//! - queues agent replies and decides when to speak ([`orchestrator`])
//! - synthesizes and plays replies through the bridge ([`playback`])
//! - manages per-guild sessions ([`session`]) and exposes voice tools
//!   ([`tools`])
//!
//! # Example
//!
//! ```no_run
//! use ezra_adaptor_discord::*;
//! use ezra_core::{AgentOrchestrator, EzraConfig};
//! use std::sync::Arc;
//!
//! # async fn example(agent: Arc<dyn AgentOrchestrator>) -> ezra_core::Result<()> {
//! let config = EzraConfig::from_env()?;
//! let gateway = Arc::new(ChannelGatewaySink::new());
//! let runtime = VoiceRuntime::start(
//!     &config.voice,
//!     StartupOptions::new("ezra", "1234567890"),
//!     agent,
//!     gateway,
//! )
//! .await?;
//! runtime.manager().join("guild", "voice-channel").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod gateway;
pub mod ingress;
pub mod orchestrator;
pub mod playback;
pub mod runtime;
pub mod segment;
pub mod session;
pub mod ssrc;
pub mod testing;
pub mod tools;
pub mod vad;

pub use bridge::{BackoffPolicy, BridgeClient, BridgeMessage, PayloadHandler, VoiceBridge};
pub use gateway::{ChannelGatewaySink, GatewayForwarder, GatewaySink};
pub use ingress::{decode_datagram, encode_datagram, AudioIngress, FrameSink, PcmFrame};
pub use orchestrator::{compute_priority, OrchestratorConfig, QueuedResponse, ResponseQueue, VoiceOrchestrator};
pub use playback::{deletion_delay, PlaybackDispatcher, PlaybackReport};
pub use runtime::{StartupOptions, VoiceRuntime};
pub use segment::{Segment, SegmentAssembler};
pub use session::{JoinOutcome, PipelineConfig, SessionStatus, VoiceManager, VoiceServices, VoiceSession};
pub use ssrc::SsrcResolver;
pub use tools::VoiceToolExecutor;
pub use vad::{SegmentEnd, SpeechEnd, VadConfig, VoiceActivityDetector};
