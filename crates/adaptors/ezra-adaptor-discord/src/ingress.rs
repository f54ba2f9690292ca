//! Decoded PCM arriving from the bridge over UDP
//!
//! Datagram layout: `u8 id_len | id_len bytes of user id | i16 LE samples`
//! (48 kHz mono). Malformed datagrams are dropped without reply.

use ezra_core::{EzraError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Read deadline so cancellation is observed promptly
pub const READ_DEADLINE: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 65_536;

/// One decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    /// User id, or `ssrc:<n>` when the bridge could not attribute it
    pub source_id: String,
    /// Mono 16-bit samples
    pub samples: Vec<i16>,
}

/// Decode a datagram
pub fn decode_datagram(datagram: &[u8]) -> Result<PcmFrame> {
    if datagram.len() < 2 {
        return Err(EzraError::audio_malformed("datagram shorter than 2 bytes"));
    }
    let id_len = datagram[0] as usize;
    if id_len == 0 || datagram.len() < 1 + id_len {
        return Err(EzraError::audio_malformed("datagram shorter than its id"));
    }

    let source_id = std::str::from_utf8(&datagram[1..1 + id_len])
        .map_err(|_| EzraError::audio_malformed("user id is not utf-8"))?
        .to_string();

    let samples = datagram[1 + id_len..]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    Ok(PcmFrame { source_id, samples })
}

/// Encode a datagram (used by the bridge side and tests)
pub fn encode_datagram(source_id: &str, samples: &[i16]) -> Vec<u8> {
    let id = source_id.as_bytes();
    let id_len = id.len().min(u8::MAX as usize);
    let mut out = Vec::with_capacity(1 + id_len + samples.len() * 2);
    out.push(id_len as u8);
    out.extend_from_slice(&id[..id_len]);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Receives decoded frames
pub trait FrameSink: Send + Sync {
    /// Route one frame; must not block
    fn deliver(&self, frame: PcmFrame);
}

/// Bound UDP endpoint for bridge audio
pub struct AudioIngress {
    socket: UdpSocket,
}

impl AudioIngress {
    /// Bind `127.0.0.1:<port>`
    pub async fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from(([127, 0, 0, 1], port))).await
    }

    /// Bind an explicit address
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "Listening for bridge audio");
        Ok(Self { socket })
    }

    /// Bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Read until cancelled, handing each decoded frame to `sink`
    pub async fn run(self, sink: Arc<dyn FrameSink>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut dropped: u64 = 0;

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(READ_DEADLINE, self.socket.recv_from(&mut buf)) => r,
            };

            let len = match received {
                Err(_) => continue,
                Ok(Ok((len, _))) => len,
                Ok(Err(e)) => {
                    warn!(error = %e, "Audio socket read failed");
                    continue;
                }
            };

            match decode_datagram(&buf[..len]) {
                Ok(frame) => sink.deliver(frame),
                Err(e) => {
                    dropped += 1;
                    trace!(len, error = %e, dropped, "Dropped malformed datagram");
                }
            }
        }

        debug!(dropped, "Audio ingress stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_decode() {
        let frame = decode_datagram(&encode_datagram("u1", &[1, -2, 300])).unwrap();
        assert_eq!(frame.source_id, "u1");
        assert_eq!(frame.samples, vec![1, -2, 300]);
    }

    #[test]
    fn test_decode_rejects_short_datagrams() {
        assert!(decode_datagram(&[]).is_err());
        assert!(decode_datagram(&[1]).is_err());
        // claims a 5-byte id but carries 3
        assert!(decode_datagram(&[5, b'a', b'b', b'c']).is_err());
        assert!(decode_datagram(&[0, 0, 0]).is_err());
        assert!(decode_datagram(&[2, 0xff, 0xfe, 0, 0]).is_err());
    }

    #[test]
    fn test_id_only_datagram_has_no_samples() {
        let frame = decode_datagram(&[2, b'u', b'9']).unwrap();
        assert_eq!(frame.source_id, "u9");
        assert!(frame.samples.is_empty());
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<PcmFrame>>);

    impl FrameSink for Collect {
        fn deliver(&self, frame: PcmFrame) {
            self.0.lock().push(frame);
        }
    }

    #[tokio::test]
    async fn test_run_delivers_and_stops_on_cancel() {
        let ingress = AudioIngress::bind(0).await.unwrap();
        let addr = ingress.local_addr().unwrap();
        let sink = Arc::new(Collect::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ingress.run(sink.clone(), cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&[9], addr).await.unwrap();
        sender
            .send_to(&encode_datagram("u1", &[5; 480]), addr)
            .await
            .unwrap();

        for _ in 0..50 {
            if !sink.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.0.lock().len(), 1);
        assert_eq!(sink.0.lock()[0].samples.len(), 480);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
