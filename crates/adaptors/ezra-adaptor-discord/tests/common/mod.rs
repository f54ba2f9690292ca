#![allow(dead_code)]

use async_trait::async_trait;
use ezra_adaptor_discord::testing::{RecordingBridge, ScriptedSynthesizer, ScriptedTranscriber};
use ezra_adaptor_discord::{PipelineConfig, PlaybackDispatcher, VoiceManager, VoiceServices};
use ezra_core::testing::EchoOrchestrator;
use ezra_core::Result;
use ezra_provider_voice::{encode_mono_wav, ReferenceStore, Transcoder};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Websocket server standing in for the voice bridge
pub struct FakeBridge {
    pub url: String,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

impl FakeBridge {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let registry = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut sink, mut source) = ws.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                registry.lock().push(out_tx);

                tokio::spawn(async move {
                    while let Some(frame) = out_rx.recv().await {
                        let closing = matches!(frame, Message::Close(_));
                        if sink.send(frame).await.is_err() || closing {
                            break;
                        }
                    }
                });

                let received_tx = received_tx.clone();
                tokio::spawn(async move {
                    while let Some(Ok(frame)) = source.next().await {
                        if let Message::Text(text) = frame {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                let _ = received_tx.send(value);
                            }
                        }
                    }
                });
            }
        });

        Self {
            url,
            received: tokio::sync::Mutex::new(received_rx),
            connections,
        }
    }

    /// Wait until `n` connections have been accepted
    pub async fn wait_connections(&self, n: usize) {
        for _ in 0..200 {
            if self.connections.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("bridge never saw {n} connections");
    }

    /// Send a frame on the newest connection
    pub fn send(&self, frame: Value) {
        let connections = self.connections.lock();
        let latest = connections.last().expect("no bridge connection");
        latest.send(Message::Text(frame.to_string())).unwrap();
    }

    /// Close the newest connection from the bridge side
    pub fn close_latest(&self) {
        let connections = self.connections.lock();
        let latest = connections.last().expect("no bridge connection");
        let _ = latest.send(Message::Close(None));
    }

    /// Next frame received from the client
    pub async fn next_frame(&self) -> Value {
        let mut received = self.received.lock().await;
        tokio::time::timeout(Duration::from_secs(2), received.recv())
            .await
            .expect("timed out waiting for bridge frame")
            .expect("bridge receiver closed")
    }
}

/// Transcoder that copies its input
pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn to_reference_wav(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Reference directory holding a default reference
pub async fn reference_store() -> (TempDir, Arc<ReferenceStore>) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("default.wav"), encode_mono_wav(&[0; 2400], 24_000)).unwrap();
    let store = ReferenceStore::open(dir.path(), Arc::new(CopyTranscoder)).await.unwrap();
    (dir, Arc::new(store))
}

/// Pipeline timings short enough for wall-clock tests
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.vad.silence_grace = Duration::from_millis(200);
    config.orchestrator.quiet_window = Duration::from_millis(300);
    config.orchestrator.cooldown = Duration::from_millis(300);
    config.orchestrator.tick = Duration::from_millis(50);
    config.flush_poll = Duration::from_millis(20);
    config
}

pub struct Harness {
    pub manager: Arc<VoiceManager>,
    pub bridge: Arc<RecordingBridge>,
    pub stt: Arc<ScriptedTranscriber>,
    pub tts: Arc<ScriptedSynthesizer>,
    pub agent: Arc<EchoOrchestrator>,
    pub references: Arc<ReferenceStore>,
    pub playback_dir: TempDir,
    _reference_dir: TempDir,
}

impl Harness {
    pub async fn new(
        stt: ScriptedTranscriber,
        tts: ScriptedSynthesizer,
        agent: EchoOrchestrator,
        streaming: bool,
    ) -> Self {
        Self::with_bridge(stt, tts, agent, streaming, RecordingBridge::new()).await
    }

    pub async fn with_bridge(
        stt: ScriptedTranscriber,
        tts: ScriptedSynthesizer,
        agent: EchoOrchestrator,
        streaming: bool,
        bridge: RecordingBridge,
    ) -> Self {
        let (reference_dir, references) = reference_store().await;
        let playback_dir = TempDir::new().unwrap();
        let bridge = Arc::new(bridge);
        let stt = Arc::new(stt);
        let tts = Arc::new(tts);
        let agent = Arc::new(agent);

        let playback = Arc::new(
            PlaybackDispatcher::new(bridge.clone(), tts.clone(), streaming).with_temp_dir(playback_dir.path()),
        );
        let services = VoiceServices {
            bridge: bridge.clone(),
            transcriber: stt.clone(),
            agent: agent.clone(),
            references: references.clone(),
            playback,
        };

        Self {
            manager: Arc::new(VoiceManager::new(fast_config(), services)),
            bridge,
            stt,
            tts,
            agent,
            references,
            playback_dir,
            _reference_dir: reference_dir,
        }
    }
}

/// `ms` milliseconds of 48 kHz speech at normalized RMS 0.05
pub fn speech(ms: usize) -> Vec<i16> {
    vec![1638; ms * 48]
}

/// Deliver `samples` as 20 ms datagrams
pub async fn speak(manager: &VoiceManager, user_id: &str, samples: &[i16]) {
    use ezra_adaptor_discord::{FrameSink, PcmFrame};

    for chunk in samples.chunks(960) {
        manager.deliver(PcmFrame {
            source_id: user_id.to_string(),
            samples: chunk.to_vec(),
        });
        tokio::task::yield_now().await;
    }
}

/// Poll `check` every 10 ms for up to `limit`
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Files currently in the playback temp directory
pub fn playback_files(h: &Harness) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(h.playback_dir.path())
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
