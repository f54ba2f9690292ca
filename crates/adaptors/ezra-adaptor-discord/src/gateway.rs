//! Gateway payload forwarding
//!
//! The bridge negotiates the voice connection through the bot's own gateway
//! session, so it hands us gateway-shaped payloads to send. Only the
//! forwarder writes to the gateway socket on the voice subsystem's behalf.

use ezra_core::{EzraError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::PayloadHandler;

/// Raw write access to the live gateway websocket
pub trait GatewaySink: Send + Sync {
    /// Write one JSON frame
    fn send_raw(&self, payload: &Value) -> Result<()>;
}

/// Gateway sink that hands frames to the task owning the socket
///
/// The gateway client attaches its outbound channel once the socket is up
/// and detaches it on disconnect.
#[derive(Default)]
pub struct ChannelGatewaySink {
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
}

impl ChannelGatewaySink {
    /// Sink with no socket attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the socket writer
    pub fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *self.outbound.write() = Some(outbound);
    }

    /// Detach the socket writer
    pub fn detach(&self) {
        *self.outbound.write() = None;
    }
}

impl GatewaySink for ChannelGatewaySink {
    fn send_raw(&self, payload: &Value) -> Result<()> {
        let guard = self.outbound.read();
        let outbound = guard.as_ref().ok_or(EzraError::GatewayNotReady)?;
        let frame = serde_json::to_string(payload)?;
        outbound.send(frame).map_err(|_| EzraError::GatewayNotReady)
    }
}

/// Writes bridge-originated payloads onto the gateway
pub struct GatewayForwarder {
    sink: Arc<dyn GatewaySink>,
    forwarded: AtomicU64,
}

impl GatewayForwarder {
    /// Forwarder writing to `sink`
    pub fn new(sink: Arc<dyn GatewaySink>) -> Self {
        Self {
            sink,
            forwarded: AtomicU64::new(0),
        }
    }

    /// Write one payload; it must carry a numeric `op`
    pub fn forward(&self, payload: &Value) -> Result<()> {
        if !payload.get("op").map(Value::is_u64).unwrap_or(false) {
            return Err(EzraError::validation("gateway payload has no numeric op"));
        }
        self.sink.send_raw(payload)?;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Payloads written so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Handler to register with the bridge client
    ///
    /// Failures are logged and dropped; the bridge re-issues as needed.
    pub fn handler(self: &Arc<Self>) -> PayloadHandler {
        let forwarder = self.clone();
        Arc::new(move |payload: Value| match forwarder.forward(&payload) {
            Ok(()) => debug!(op = ?payload.get("op"), "Forwarded bridge payload to gateway"),
            Err(e) => warn!(error = %e, kind = e.kind(), "Dropped bridge payload"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_ready_without_socket() {
        let forwarder = GatewayForwarder::new(Arc::new(ChannelGatewaySink::new()));
        let err = forwarder.forward(&json!({"op": 4, "d": {}})).unwrap_err();
        assert_eq!(err.kind(), "gateway_not_ready");
        assert_eq!(forwarder.forwarded(), 0);
    }

    #[test]
    fn test_forwards_single_frame() {
        let sink = Arc::new(ChannelGatewaySink::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach(tx);

        let forwarder = Arc::new(GatewayForwarder::new(sink.clone()));
        let handler = forwarder.handler();
        handler(json!({"op": 4, "d": {"guild_id": "g1", "channel_id": "c1"}}));

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["op"], 4);
        assert_eq!(frame["d"]["guild_id"], "g1");
        assert!(rx.try_recv().is_err());
        assert_eq!(forwarder.forwarded(), 1);

        sink.detach();
        handler(json!({"op": 4}));
        assert_eq!(forwarder.forwarded(), 1);
    }

    #[test]
    fn test_rejects_payload_without_op() {
        let sink = Arc::new(ChannelGatewaySink::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        sink.attach(tx);
        let forwarder = GatewayForwarder::new(sink);
        assert!(forwarder.forward(&json!({"d": {}})).is_err());
        assert!(forwarder.forward(&json!({"op": "4"})).is_err());
    }
}
