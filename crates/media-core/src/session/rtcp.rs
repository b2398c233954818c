//! Session-level RTCP bookkeeping and aggregation
//!
//! The session toggle is independent of each transport's own RTCP
//! machinery: enabling it zeroes the session counters and fans the toggle
//! out to every transport. Aggregation sums the additive counters across
//! transports and takes worst-case values for the quality estimators.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::transport::MediaTransport;
use crate::types::RtcpStatistics;

/// Session-side RTCP state
pub(super) struct RtcpState {
    /// Session-level toggle, independent of transport RTCP
    pub(super) enabled: RwLock<bool>,

    /// Session-local counters, zeroed whenever the toggle flips on
    pub(super) session_stats: RwLock<RtcpStatistics>,

    /// When the last aggregate report went out
    pub(super) last_sent: RwLock<Option<Instant>>,

    /// Guards against spawning a second RTCP worker
    pub(super) worker_running: AtomicBool,
}

impl RtcpState {
    pub(super) fn new(enabled: bool) -> Self {
        Self {
            enabled: RwLock::new(enabled),
            session_stats: RwLock::new(RtcpStatistics::default()),
            last_sent: RwLock::new(None),
            worker_running: AtomicBool::new(false),
        }
    }
}

/// Aggregate RTCP statistics across every RTCP-enabled transport.
///
/// Counters are summed. Jitter and fraction lost are the maximum across
/// transports: a worst-case summary, not an RFC-defined combination, and
/// consumers should read them as such. The last-SR fields come from
/// whichever transport heard a sender report most recently.
pub(super) fn aggregate_statistics(
    session_stats: &RtcpStatistics,
    transports: &[(String, Arc<dyn MediaTransport>)],
) -> RtcpStatistics {
    let mut aggregate = session_stats.clone();

    for (_, transport) in transports {
        if !transport.is_rtcp_enabled() {
            continue;
        }
        for block in transport.rtcp_statistics().blocks() {
            aggregate.packets_sent += block.packets_sent;
            aggregate.octets_sent += block.octets_sent;
            aggregate.packets_received += block.packets_received;
            aggregate.octets_received += block.octets_received;
            aggregate.packets_lost += block.packets_lost;
            aggregate.jitter = aggregate.jitter.max(block.jitter);
            aggregate.fraction_lost = aggregate.fraction_lost.max(block.fraction_lost);
            if let Some(received) = block.last_sr_received {
                if aggregate
                    .last_sr_received
                    .map(|current| received > current)
                    .unwrap_or(true)
                {
                    aggregate.last_sr_received = Some(received);
                    aggregate.last_sr_timestamp = block.last_sr_timestamp;
                }
            }
        }
    }

    aggregate
}
