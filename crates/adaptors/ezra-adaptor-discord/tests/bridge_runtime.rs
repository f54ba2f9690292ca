mod common;

use common::{eventually, FakeBridge};
use ezra_adaptor_discord::{
    encode_datagram, BackoffPolicy, BridgeClient, ChannelGatewaySink, GatewayForwarder, StartupOptions,
    VoiceRuntime,
};
use ezra_core::testing::EchoOrchestrator;
use ezra_core::{EzraError, VoiceSettings};
use ezra_provider_voice::WarmupPolicy;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn quick_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_attempts: 10,
    }
}

fn options() -> StartupOptions {
    let mut options = StartupOptions::new("ezra", "bot-1");
    options.bridge_backoff = quick_backoff();
    options.warmup = WarmupPolicy {
        max_attempts: 1,
        step: Duration::from_millis(1),
        request_timeout: Duration::from_millis(200),
    };
    options
}

fn settings(bridge_url: &str, reference_dir: &Path) -> VoiceSettings {
    VoiceSettings {
        stt_url: "http://127.0.0.1:9".to_string(),
        tts_url: "http://127.0.0.1:9".to_string(),
        bridge_url: bridge_url.to_string(),
        reference_dir: reference_dir.to_path_buf(),
        audio_port: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn client_sends_join_and_play_frames() {
    let fake = FakeBridge::start().await;
    let client = BridgeClient::connect(&fake.url, quick_backoff(), Arc::new(|_| {}))
        .await
        .unwrap();

    use ezra_adaptor_discord::VoiceBridge;
    client.join_channel("g1", "vc1").await.unwrap();
    client.play_audio("g1", Path::new("/tmp/tts_x.wav")).await.unwrap();

    assert_eq!(
        fake.next_frame().await,
        json!({"op": "JOIN", "data": {"guildId": "g1", "channelId": "vc1", "selfDeaf": false, "selfMute": false}})
    );
    assert_eq!(
        fake.next_frame().await,
        json!({"op": "PLAY", "data": {"guildId": "g1", "type": "file", "path": "/tmp/tts_x.wav"}})
    );
}

#[tokio::test]
async fn only_own_voice_state_is_proxied() {
    let fake = FakeBridge::start().await;
    let client = BridgeClient::connect(&fake.url, quick_backoff(), Arc::new(|_| {}))
        .await
        .unwrap();

    let other = json!({"user_id": "someone", "guild_id": "g1", "session_id": "s"});
    let own = json!({"user_id": "bot-1", "guild_id": "g1", "session_id": "s"});
    assert!(!client.send_voice_state_update(other, "bot-1").await.unwrap());
    assert!(client.send_voice_state_update(own.clone(), "bot-1").await.unwrap());
    client
        .send_voice_server_update(json!({"token": "t", "guild_id": "g1", "endpoint": "e"}))
        .await
        .unwrap();

    let state = fake.next_frame().await;
    assert_eq!(state["op"], "VOICE_STATE_UPDATE");
    assert_eq!(state["data"], own);
    assert_eq!(fake.next_frame().await["op"], "VOICE_SERVER_UPDATE");
}

#[tokio::test]
async fn forwarded_payloads_reach_the_gateway() {
    let fake = FakeBridge::start().await;
    let sink = Arc::new(ChannelGatewaySink::new());
    let (gateway_tx, mut gateway_rx) = mpsc::unbounded_channel();
    sink.attach(gateway_tx);
    let forwarder = Arc::new(GatewayForwarder::new(sink));

    let _client = BridgeClient::connect(&fake.url, quick_backoff(), forwarder.handler())
        .await
        .unwrap();
    fake.wait_connections(2).await;

    fake.send(json!({
        "op": "FORWARD_PAYLOAD",
        "data": {"op": 4, "d": {"guild_id": "g1", "channel_id": "vc1", "self_mute": false, "self_deaf": false}}
    }));
    fake.send(json!({"op": "FORWARD_PAYLOAD", "data": {"d": {}}}));

    let frame = tokio::time::timeout(Duration::from_secs(2), gateway_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame["op"], 4);
    assert_eq!(frame["d"]["channel_id"], "vc1");

    assert!(eventually(Duration::from_secs(1), || forwarder.forwarded() == 1).await);
    assert!(gateway_rx.try_recv().is_err());
}

#[tokio::test]
async fn lost_connection_cancels_the_lost_token() {
    let fake = FakeBridge::start().await;
    let client = BridgeClient::connect(&fake.url, quick_backoff(), Arc::new(|_| {}))
        .await
        .unwrap();
    fake.wait_connections(2).await;
    assert!(client.is_connected());

    fake.close_latest();
    tokio::time::timeout(Duration::from_secs(2), client.lost().cancelled())
        .await
        .unwrap();
    assert!(!client.is_connected());

    let err = client.send(ezra_adaptor_discord::BridgeMessage::join("g1", "vc1")).await.unwrap_err();
    assert_eq!(err.kind(), "bridge_lost");
}

#[tokio::test]
async fn startup_fails_without_bridge_and_binds_nothing() {
    let port = {
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };
    let refs = TempDir::new().unwrap();
    let mut settings = settings("ws://127.0.0.1:9", refs.path());
    settings.audio_port = port;

    let result = VoiceRuntime::start(
        &settings,
        options(),
        Arc::new(EchoOrchestrator::new()),
        Arc::new(ChannelGatewaySink::new()),
    )
    .await;

    match result {
        Err(EzraError::BridgeUnavailable { attempts, .. }) => assert_eq!(attempts, 10),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("startup should fail"),
    }
    // the audio port was never taken
    UdpSocket::bind(("127.0.0.1", port)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runtime_routes_audio_and_tears_down_on_bridge_loss() {
    let fake = FakeBridge::start().await;
    let refs = TempDir::new().unwrap();
    let mut runtime = VoiceRuntime::start(
        &settings(&fake.url, refs.path()),
        options(),
        Arc::new(EchoOrchestrator::new()),
        Arc::new(ChannelGatewaySink::new()),
    )
    .await
    .unwrap();

    let report = runtime.warmup_report().await.unwrap();
    assert!(!report.all_ready());
    assert!(runtime.warmup_report().await.is_none());

    let ctx = ezra_core::ExecutionContext {
        agent_id: "ezra".to_string(),
        user_id: "u1".to_string(),
        channel_id: "vc1".to_string(),
        guild_id: "g1".to_string(),
    };
    let joined = runtime
        .tools()
        .execute("join_voice_channel", &ctx, &json!({}))
        .await;
    assert!(joined.success, "{:?}", joined.error);
    assert_eq!(fake.next_frame().await["op"], "JOIN");

    runtime
        .on_voice_state_update(json!({"guild_id": "g1", "user_id": "u1", "channel_id": "vc1", "self_mute": false}))
        .await
        .unwrap();
    let session = runtime.manager().session("g1").unwrap();
    assert!(session.ssrc().is_member("u1"));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(&encode_datagram("u1", &[1638; 960]), runtime.audio_addr())
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || session.vad().is_speaking("u1")).await);

    fake.close_latest();
    assert!(eventually(Duration::from_secs(3), || runtime.manager().sessions().is_empty()).await);
    assert!(session.is_cancelled());

    runtime.shutdown().await;
}
