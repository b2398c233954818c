//! Transport contract consumed by the media session
//!
//! The session core never touches sockets. It drives transports through
//! this trait and receives inbound packets through the [`PacketSink`] it
//! registers. Transports own serialization, SSRC allocation and the RTCP
//! machinery for their own streams; the session aggregates across them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::packet::RtpPacket;
use crate::types::{MediaDirection, RtcpStatsSnapshot, TransportStats};

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Coarse transport life-cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created but not started
    Idle,
    /// Started and able to move packets
    Running,
    /// Stopped, no further I/O
    Stopped,
}

/// Receiver for inbound packets, registered by the session.
///
/// The transport holds the sink behind a replaceable slot and must invoke it
/// from whatever task context its socket I/O runs in; the sink itself holds
/// only a non-owning reference back to the session, so dropping the session
/// quietly ends delivery.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Deliver one inbound RTP packet
    async fn deliver(&self, packet: RtpPacket);
}

/// Contract an RTP transport provides to the media session.
///
/// Implementations wrap a UDP or DTLS socket pair elsewhere in the stack;
/// the session only ever holds them as shared references and never closes
/// the underlying socket.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Start the transport's I/O
    async fn start(&self) -> TransportResult<()>;

    /// Stop the transport's I/O. The socket stays owned by the transport.
    async fn stop(&self) -> TransportResult<()>;

    /// Write one audio frame; the transport chooses payload type, sequence
    /// number and timestamp for its own stream
    async fn send_audio(&self, frame: Bytes, ptime: Duration) -> TransportResult<()>;

    /// Write a pre-formed RTP packet (telephone events)
    async fn send_packet(&self, packet: RtpPacket) -> TransportResult<()>;

    /// Local synchronization source identifier
    fn ssrc(&self) -> u32;

    /// Current life-cycle state
    fn state(&self) -> TransportState;

    /// Coarse packet counters for diagnostics
    fn statistics(&self) -> TransportStats;

    /// Current stream direction
    fn direction(&self) -> MediaDirection;

    /// Update the stream direction (driven by external signaling)
    async fn set_direction(&self, direction: MediaDirection) -> TransportResult<()>;

    /// Whether the transport may send media
    fn can_send(&self) -> bool {
        self.direction().can_send()
    }

    /// Whether the transport may receive media
    fn can_receive(&self) -> bool {
        self.direction().can_receive()
    }

    /// Install the inbound packet sink, replacing any previous one
    async fn register_incoming_handler(&self, sink: Arc<dyn PacketSink>) -> TransportResult<()>;

    /// Remove the inbound packet sink
    async fn clear_incoming_handler(&self);

    /// Toggle this transport's RTCP machinery
    async fn enable_rtcp(&self, enabled: bool) -> TransportResult<()>;

    /// Whether this transport's RTCP machinery is running
    fn is_rtcp_enabled(&self) -> bool;

    /// Emit an RTCP report now
    async fn send_rtcp_report(&self) -> TransportResult<()>;

    /// Snapshot this transport's RTCP statistics
    fn rtcp_statistics(&self) -> RtcpStatsSnapshot;
}
