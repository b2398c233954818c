//! Minimal RTP packet model
//!
//! The transport layer owns serialization; the session core only consumes
//! the header fields it routes on plus the raw payload.

use bytes::Bytes;

/// The RTP header fields consumed by the session core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Payload type identifying the codec
    pub payload_type: u8,

    /// 16-bit sequence number, increments per packet
    pub sequence_number: u16,

    /// Media timestamp in clock-rate units
    pub timestamp: u32,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Marker bit (start of talkspurt / first DTMF packet)
    pub marker: bool,
}

impl RtpHeader {
    /// Create a new header with the marker bit cleared
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            marker: false,
        }
    }
}

/// An RTP packet as handed across the transport boundary
#[derive(Debug, Clone)]
pub struct RtpPacket {
    /// Header fields
    pub header: RtpHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new packet
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Payload length in bytes
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
