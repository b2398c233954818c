//! Core types for the media session layer
//!
//! This module defines the payload-type table, stream directions and the
//! session life-cycle states shared by every component of the crate.

pub mod stats;

use std::fmt;
use std::time::Duration;

pub use stats::{MediaSessionStats, RtcpStatistics, RtcpStatsSnapshot, TransportStats};

/// Default payload type for RFC 4733 telephone events
pub const DEFAULT_DTMF_PAYLOAD_TYPE: u8 = 101;

/// Audio payload types supported by the session core (RFC 3551 static assignments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioPayloadType {
    /// G.711 µ-law (PT 0)
    Pcmu,
    /// GSM 06.10 full rate (PT 3)
    Gsm,
    /// G.711 A-law (PT 8)
    Pcma,
    /// G.722 wideband (PT 9)
    G722,
    /// G.728 LD-CELP (PT 15)
    G728,
    /// G.729 CS-ACELP (PT 18)
    G729,
}

impl AudioPayloadType {
    /// Resolve a static RTP payload type number, `None` for anything outside
    /// the supported set.
    pub fn from_u8(pt: u8) -> Option<Self> {
        match pt {
            0 => Some(Self::Pcmu),
            3 => Some(Self::Gsm),
            8 => Some(Self::Pcma),
            9 => Some(Self::G722),
            15 => Some(Self::G728),
            18 => Some(Self::G729),
            _ => None,
        }
    }

    /// RTP payload type number
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Pcmu => 0,
            Self::Gsm => 3,
            Self::Pcma => 8,
            Self::G722 => 9,
            Self::G728 => 15,
            Self::G729 => 18,
        }
    }

    /// Codec name as registered with IANA
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pcmu => "PCMU",
            Self::Gsm => "GSM",
            Self::Pcma => "PCMA",
            Self::G722 => "G722",
            Self::G728 => "G728",
            Self::G729 => "G729",
        }
    }

    /// RTP clock rate in Hz.
    ///
    /// G.722 samples at 16 kHz but its RTP clock is 8000 Hz for historical
    /// reasons (RFC 3551 §4.5.2), so every supported codec ticks at 8000.
    pub fn clock_rate(&self) -> u32 {
        8000
    }

    /// Number of samples carried in one packet of duration `ptime`
    pub fn samples_per_packet(&self, ptime: Duration) -> usize {
        (self.clock_rate() as u128 * ptime.as_millis() / 1000) as usize
    }

    /// Expected RTP payload size in bytes for one packet of duration `ptime`.
    ///
    /// PCMU/PCMA/G722 carry one byte per sample on the wire; the frame-based
    /// codecs map a fixed frame of samples to a fixed number of bytes.
    pub fn expected_payload_size(&self, ptime: Duration) -> usize {
        let samples = self.samples_per_packet(ptime);
        match self {
            Self::Pcmu | Self::Pcma | Self::G722 => samples,
            // 33-byte frame per 160 samples (20 ms)
            Self::Gsm => samples * 33 / 160,
            // 25 bytes per 200 samples
            Self::G728 => samples * 25 / 200,
            // 10-byte frame per 80 samples (10 ms)
            Self::G729 => samples * 10 / 80,
        }
    }
}

impl fmt::Display for AudioPayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Media stream direction (RFC 4566 attribute semantics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaDirection {
    /// Send and receive media
    #[default]
    SendRecv,
    /// Send only
    SendOnly,
    /// Receive only
    RecvOnly,
    /// No media flow
    Inactive,
}

impl MediaDirection {
    /// Whether this direction allows sending media
    pub fn can_send(&self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    /// Whether this direction allows receiving media
    pub fn can_receive(&self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        };
        write!(f, "{}", s)
    }
}

/// Media session life-cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Initial state, no workers running
    #[default]
    Idle,
    /// Workers running, media flowing
    Active,
    /// Workers running, new sends refused
    Paused,
    /// Terminal state, all workers joined
    Closed,
}

impl SessionState {
    /// Whether the transition `self` → `next` is lawful.
    ///
    /// Idle is never re-entered and Closed is terminal; Closed → Closed is
    /// allowed so that `stop()` stays idempotent.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Active) => true,
            (Self::Active, Self::Paused) => true,
            (Self::Paused, Self::Active) => true,
            (_, Self::Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}
