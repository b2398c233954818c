//! In-memory transport fake shared by the integration suites

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use softphone_media_core::prelude::*;

/// Install the log subscriber once per test binary; RUST_LOG drives
/// verbosity as usual
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A transport that records everything the session sends and lets tests
/// inject inbound packets as if they arrived from the network
pub struct MockTransport {
    ssrc: u32,
    direction: RwLock<MediaDirection>,
    state: RwLock<TransportState>,
    sink: RwLock<Option<Arc<dyn PacketSink>>>,
    sent_audio: Mutex<Vec<(Bytes, Duration)>>,
    sent_packets: Mutex<Vec<RtpPacket>>,
    rtcp_enabled: AtomicBool,
    rtcp_reports_sent: AtomicU64,
    rtcp_snapshot: Mutex<RtcpStatsSnapshot>,
    fail_audio_sends: AtomicBool,
}

impl MockTransport {
    pub fn new(direction: MediaDirection) -> Self {
        Self {
            ssrc: rand::random(),
            direction: RwLock::new(direction),
            state: RwLock::new(TransportState::Idle),
            sink: RwLock::new(None),
            sent_audio: Mutex::new(Vec::new()),
            sent_packets: Mutex::new(Vec::new()),
            rtcp_enabled: AtomicBool::new(false),
            rtcp_reports_sent: AtomicU64::new(0),
            rtcp_snapshot: Mutex::new(RtcpStatsSnapshot::Flat(RtcpStatistics::default())),
            fail_audio_sends: AtomicBool::new(false),
        }
    }

    pub fn with_rtcp_snapshot(direction: MediaDirection, snapshot: RtcpStatsSnapshot) -> Self {
        let transport = Self::new(direction);
        *transport.rtcp_snapshot.lock().unwrap() = snapshot;
        transport
    }

    /// Pretend a packet arrived from the network
    pub async fn inject(&self, packet: RtpPacket) {
        let sink = self.sink.read().unwrap().clone();
        if let Some(sink) = sink {
            sink.deliver(packet).await;
        }
    }

    pub fn has_incoming_handler(&self) -> bool {
        self.sink.read().unwrap().is_some()
    }

    pub fn sent_audio(&self) -> Vec<(Bytes, Duration)> {
        self.sent_audio.lock().unwrap().clone()
    }

    pub fn sent_packets(&self) -> Vec<RtpPacket> {
        self.sent_packets.lock().unwrap().clone()
    }

    pub fn rtcp_reports_sent(&self) -> u64 {
        self.rtcp_reports_sent.load(Ordering::Acquire)
    }

    pub fn set_fail_audio_sends(&self, fail: bool) {
        self.fail_audio_sends.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn start(&self) -> TransportResult<()> {
        *self.state.write().unwrap() = TransportState::Running;
        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        *self.state.write().unwrap() = TransportState::Stopped;
        Ok(())
    }

    async fn send_audio(&self, frame: Bytes, ptime: Duration) -> TransportResult<()> {
        if self.fail_audio_sends.load(Ordering::Acquire) {
            return Err("simulated socket failure".into());
        }
        self.sent_audio.lock().unwrap().push((frame, ptime));
        Ok(())
    }

    async fn send_packet(&self, packet: RtpPacket) -> TransportResult<()> {
        self.sent_packets.lock().unwrap().push(packet);
        Ok(())
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn state(&self) -> TransportState {
        *self.state.read().unwrap()
    }

    fn statistics(&self) -> TransportStats {
        let sent = self.sent_audio.lock().unwrap();
        TransportStats {
            packets_sent: sent.len() as u64,
            bytes_sent: sent.iter().map(|(b, _)| b.len() as u64).sum(),
            ..Default::default()
        }
    }

    fn direction(&self) -> MediaDirection {
        *self.direction.read().unwrap()
    }

    async fn set_direction(&self, direction: MediaDirection) -> TransportResult<()> {
        *self.direction.write().unwrap() = direction;
        Ok(())
    }

    async fn register_incoming_handler(&self, sink: Arc<dyn PacketSink>) -> TransportResult<()> {
        *self.sink.write().unwrap() = Some(sink);
        Ok(())
    }

    async fn clear_incoming_handler(&self) {
        *self.sink.write().unwrap() = None;
    }

    async fn enable_rtcp(&self, enabled: bool) -> TransportResult<()> {
        self.rtcp_enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    fn is_rtcp_enabled(&self) -> bool {
        self.rtcp_enabled.load(Ordering::Acquire)
    }

    async fn send_rtcp_report(&self) -> TransportResult<()> {
        self.rtcp_reports_sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn rtcp_statistics(&self) -> RtcpStatsSnapshot {
        self.rtcp_snapshot.lock().unwrap().clone()
    }
}

/// Build a per-SSRC snapshot from `(ssrc, stats)` pairs
pub fn per_ssrc(entries: Vec<(u32, RtcpStatistics)>) -> RtcpStatsSnapshot {
    RtcpStatsSnapshot::PerSsrc(entries.into_iter().collect::<HashMap<_, _>>())
}

/// An audio packet carrying a recognizable payload fill byte
pub fn audio_packet(pt: u8, seq: u16, ts: u32, fill: u8, len: usize) -> RtpPacket {
    RtpPacket::new(
        RtpHeader::new(pt, seq, ts, 0x7788_99AA),
        Bytes::from(vec![fill; len]),
    )
}
