//! Statistics types for media sessions and RTCP reporting

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Session-wide media statistics, monotonic counters only
#[derive(Debug, Clone)]
pub struct MediaSessionStats {
    /// Audio packets handed to transports
    pub audio_packets_sent: u64,

    /// Audio payload bytes handed to transports
    pub audio_bytes_sent: u64,

    /// Audio packets accepted by the receive dispatcher
    pub audio_packets_received: u64,

    /// Audio payload bytes accepted by the receive dispatcher
    pub audio_bytes_received: u64,

    /// DTMF events sent (one per six-packet train)
    pub dtmf_events_sent: u64,

    /// DTMF digit presses recognized
    pub dtmf_events_received: u64,

    /// Last time any packet moved through the session
    pub last_activity: Instant,

    /// When the session was created
    pub session_start: Instant,

    /// Session uptime, refreshed by the housekeeping worker
    pub uptime: Duration,
}

impl Default for MediaSessionStats {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            audio_packets_sent: 0,
            audio_bytes_sent: 0,
            audio_packets_received: 0,
            audio_bytes_received: 0,
            dtmf_events_sent: 0,
            dtmf_events_received: 0,
            last_activity: now,
            session_start: now,
            uptime: Duration::ZERO,
        }
    }
}

/// RTCP statistics mirroring the RFC 3550 report fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtcpStatistics {
    /// RTP packets sent
    pub packets_sent: u64,

    /// RTP payload octets sent
    pub octets_sent: u64,

    /// RTP packets received
    pub packets_received: u64,

    /// RTP payload octets received
    pub octets_received: u64,

    /// Cumulative number of packets lost
    pub packets_lost: u64,

    /// Fraction of packets lost since the last report (0.0 - 1.0)
    pub fraction_lost: f64,

    /// Interarrival jitter estimate in RTP timestamp units
    pub jitter: f64,

    /// Middle 32 bits of the NTP timestamp from the last sender report
    pub last_sr_timestamp: u64,

    /// Wall-clock time the last sender report arrived
    pub last_sr_received: Option<Instant>,
}

/// RTCP statistics as yielded by a transport.
///
/// Transports that demultiplex several remote sources report per-SSRC;
/// simpler transports report one flat block. The session aggregator accepts
/// both shapes.
#[derive(Debug, Clone)]
pub enum RtcpStatsSnapshot {
    /// One statistics block per remote SSRC
    PerSsrc(HashMap<u32, RtcpStatistics>),
    /// A single statistics block for the whole transport
    Flat(RtcpStatistics),
}

impl RtcpStatsSnapshot {
    /// Iterate every statistics block in the snapshot regardless of shape
    pub fn blocks(&self) -> Box<dyn Iterator<Item = &RtcpStatistics> + '_> {
        match self {
            Self::PerSsrc(map) => Box::new(map.values()),
            Self::Flat(stats) => Box::new(std::iter::once(stats)),
        }
    }

    /// Whether the snapshot carries no data at all
    pub fn is_empty(&self) -> bool {
        match self {
            Self::PerSsrc(map) => map.is_empty(),
            Self::Flat(_) => false,
        }
    }
}

/// Coarse per-transport packet counters, used by diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Packets written to the wire
    pub packets_sent: u64,
    /// Packets read from the wire
    pub packets_received: u64,
    /// Payload bytes written
    pub bytes_sent: u64,
    /// Payload bytes read
    pub bytes_received: u64,
}
