//! Adaptive jitter buffer for RTP packet reordering
//!
//! Packets are held in a min-heap keyed by RTP timestamp and released by a
//! drain worker once their play time arrives. The target delay adapts to the
//! observed fill level so the buffer rides network jitter without adding
//! more latency than it must.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::packet::RtpPacket;

/// Drain worker wake-up period
const DRAIN_TICK: Duration = Duration::from_millis(5);

/// Adaptive delay adjustment step
const DELAY_STEP: Duration = Duration::from_millis(2);

/// Hard occupancy cap as a multiple of the soft buffer size
const HARD_CAP_FACTOR: usize = 16;

/// Floor for the hard cap so tiny buffers still absorb bursts
const HARD_CAP_MIN: usize = 100;

/// 16-bit sequence comparison with wrap-around (RFC 3550 §A.1).
///
/// Returns true when `a` is newer than `b`; the tie at a distance of
/// exactly 32768 is broken toward older.
pub fn is_seq_newer(a: u16, b: u16) -> bool {
    (a > b && a - b < 32768) || (a < b && b - a > 32768)
}

/// Modular distance from `older` forward to `newer`
pub fn seq_diff(newer: u16, older: u16) -> u16 {
    newer.wrapping_sub(older)
}

/// Jitter buffer configuration
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Soft occupancy bound; enqueues past it evict the oldest packet
    pub buffer_size: usize,

    /// Delay applied to play-out before adaptation kicks in
    pub initial_delay: Duration,

    /// Packetization time of the stream, lower bound for the target delay
    pub packet_time: Duration,

    /// Upper bound for the adaptive target delay
    pub max_delay: Duration,

    /// RTP clock rate used to map timestamp deltas to wall time
    pub clock_rate: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        let packet_time = Duration::from_millis(20);
        let buffer_size = 10;
        Self {
            buffer_size,
            initial_delay: Duration::from_millis(60),
            packet_time,
            max_delay: packet_time * buffer_size as u32,
            clock_rate: 8000,
        }
    }
}

impl JitterBufferConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::JitterBufferConfigInvalid {
                details: "buffer size must be at least one packet".to_string(),
            });
        }
        if self.packet_time.is_zero() {
            return Err(Error::JitterBufferConfigInvalid {
                details: "packet time must be non-zero".to_string(),
            });
        }
        if self.clock_rate == 0 {
            return Err(Error::JitterBufferConfigInvalid {
                details: "clock rate must be non-zero".to_string(),
            });
        }
        if self.max_delay < self.packet_time {
            return Err(Error::JitterBufferConfigInvalid {
                details: "max delay must be at least one packet time".to_string(),
            });
        }
        Ok(())
    }
}

/// A buffered packet with its computed play time
#[derive(Debug, Clone)]
pub struct JitterPacket {
    /// The buffered RTP packet
    pub packet: RtpPacket,
    /// When the packet arrived
    pub arrival_time: Instant,
    /// When the packet becomes due for play-out
    pub play_time: Instant,
    /// Key of the transport it arrived on
    pub transport_key: String,
}

// Heap ordering is by RTP timestamp only; arrival order breaks ties
// arbitrarily, which is fine for identical timestamps.
struct HeapEntry(JitterPacket);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.packet.header.timestamp == other.0.packet.header.timestamp
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .packet
            .header
            .timestamp
            .cmp(&other.0.packet.header.timestamp)
    }
}

/// Jitter buffer statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    /// Packets accepted by `put`
    pub packets_received: u64,
    /// Packets lost to gaps, eviction or slow consumers
    pub packets_dropped: u64,
    /// Packets that arrived behind the expected sequence number
    pub packets_late: u64,
    /// Packets handed to the output channels
    pub packets_delivered: u64,
    /// Current heap occupancy
    pub buffered: usize,
    /// Smoothed play-out delay currently applied
    pub current_delay: Duration,
    /// Delay the adaptation is steering toward
    pub target_delay: Duration,
}

struct Inner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    first_seen: bool,
    expected_seq: u16,
    base_ts: u32,
    base_time: Instant,
    current_delay: Duration,
    target_delay: Duration,
    packets_received: u64,
    packets_dropped: u64,
    packets_late: u64,
    packets_delivered: u64,
    legacy_tx: Option<mpsc::Sender<RtpPacket>>,
    extended_tx: Option<mpsc::Sender<(RtpPacket, String)>>,
    legacy_rx: Option<mpsc::Receiver<RtpPacket>>,
    extended_rx: Option<mpsc::Receiver<(RtpPacket, String)>>,
}

/// Reordering jitter buffer with adaptive play-out delay
pub struct JitterBuffer {
    config: JitterBufferConfig,
    hard_cap: usize,
    inner: Mutex<Inner>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for JitterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterBuffer")
            .field("config", &self.config)
            .field("hard_cap", &self.hard_cap)
            .finish()
    }
}

impl JitterBuffer {
    /// Create a jitter buffer, validating the configuration
    pub fn new(config: JitterBufferConfig) -> Result<Self> {
        config.validate()?;
        let hard_cap = (config.buffer_size * HARD_CAP_FACTOR).max(HARD_CAP_MIN);
        let (legacy_tx, legacy_rx) = mpsc::channel(config.buffer_size);
        let (extended_tx, extended_rx) = mpsc::channel(config.buffer_size);
        debug!(
            "Creating JitterBuffer: size={} initial_delay={}ms max_delay={}ms hard_cap={}",
            config.buffer_size,
            config.initial_delay.as_millis(),
            config.max_delay.as_millis(),
            hard_cap
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(config.buffer_size + 1),
                first_seen: false,
                expected_seq: 0,
                base_ts: 0,
                base_time: Instant::now(),
                current_delay: config.initial_delay,
                target_delay: config.initial_delay,
                packets_received: 0,
                packets_dropped: 0,
                packets_late: 0,
                packets_delivered: 0,
                legacy_tx: Some(legacy_tx),
                extended_tx: Some(extended_tx),
                legacy_rx: Some(legacy_rx),
                extended_rx: Some(extended_rx),
            }),
            config,
            hard_cap,
            stopped: AtomicBool::new(false),
        })
    }

    /// Take the legacy packet-only output channel. Can be taken once.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<RtpPacket>> {
        self.inner.lock().unwrap().legacy_rx.take()
    }

    /// Take the extended `(packet, transport_key)` output channel.
    /// Can be taken once.
    pub fn take_extended_receiver(&self) -> Option<mpsc::Receiver<(RtpPacket, String)>> {
        self.inner.lock().unwrap().extended_rx.take()
    }

    /// Enqueue a packet for reordered play-out
    pub fn put(&self, packet: RtpPacket, transport_key: &str) -> Result<()> {
        if self.stopped.load(AtomicOrdering::Acquire) {
            return Err(Error::JitterBufferStopped);
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if inner.heap.len() >= self.hard_cap {
            return Err(Error::JitterBufferFull {
                occupancy: inner.heap.len(),
                hard_cap: self.hard_cap,
            });
        }

        let seq = packet.header.sequence_number;
        let ts = packet.header.timestamp;

        if !inner.first_seen {
            inner.first_seen = true;
            inner.expected_seq = seq.wrapping_add(1);
            inner.base_ts = ts;
            inner.base_time = now;
        } else if seq != inner.expected_seq {
            if is_seq_newer(seq, inner.expected_seq) {
                // Every sequence number in the gap is unaccounted for
                let gap = seq_diff(seq, inner.expected_seq);
                inner.packets_dropped += gap as u64;
                inner.expected_seq = seq.wrapping_add(1);
                trace!("sequence gap of {} before seq={}", gap, seq);
            } else {
                inner.packets_late += 1;
                trace!("late packet seq={} (expected {})", seq, inner.expected_seq);
            }
        } else {
            inner.expected_seq = seq.wrapping_add(1);
        }

        inner.packets_received += 1;

        let play_time = {
            // Signed delta keeps packets older than the base playable now
            let delta = ts.wrapping_sub(inner.base_ts) as i32;
            let offset_us = delta as i64 * 1_000_000 / self.config.clock_rate as i64;
            let base = inner.base_time + inner.current_delay;
            if offset_us > 0 {
                base + Duration::from_micros(offset_us as u64)
            } else {
                base
            }
        };

        if inner.heap.len() >= self.config.buffer_size {
            // Overflow evicts the packet closest to play-out
            if let Some(Reverse(evicted)) = inner.heap.pop() {
                inner.packets_dropped += 1;
                trace!(
                    "evicted ts={} to make room for ts={}",
                    evicted.0.packet.header.timestamp,
                    ts
                );
            }
        }

        inner.heap.push(Reverse(HeapEntry(JitterPacket {
            packet,
            arrival_time: now,
            play_time,
            transport_key: transport_key.to_string(),
        })));

        self.adapt_delay(&mut inner);
        Ok(())
    }

    /// Steer the target delay toward half-full occupancy and smooth the
    /// applied delay toward it, decaying faster than it grows.
    fn adapt_delay(&self, inner: &mut Inner) {
        let fill = inner.heap.len();
        let target_fill = (self.config.buffer_size / 2).max(1);

        if fill * 2 > target_fill * 3 {
            inner.target_delay = inner.target_delay.saturating_sub(DELAY_STEP);
        } else if fill * 2 < target_fill {
            inner.target_delay += DELAY_STEP;
        }
        inner.target_delay = inner
            .target_delay
            .clamp(self.config.packet_time, self.config.max_delay);

        if inner.target_delay > inner.current_delay {
            inner.current_delay += (inner.target_delay - inner.current_delay) / 10;
        } else {
            inner.current_delay -= (inner.current_delay - inner.target_delay) / 5;
        }
    }

    /// Pop every packet whose play time has arrived and push it to the
    /// output channels. Returns the number of packets handed over.
    fn drain_due(&self) -> usize {
        let now = Instant::now();
        let mut due = Vec::new();
        let (legacy_tx, extended_tx) = {
            let mut inner = self.inner.lock().unwrap();
            while let Some(Reverse(entry)) = inner.heap.peek() {
                if entry.0.play_time > now {
                    break;
                }
                let Reverse(entry) = inner.heap.pop().unwrap();
                due.push(entry.0);
            }
            (inner.legacy_tx.clone(), inner.extended_tx.clone())
        };
        if due.is_empty() {
            return 0;
        }

        let mut delivered = 0usize;
        let mut dropped = 0usize;
        for jp in due {
            if let Some(tx) = &legacy_tx {
                if tx.try_send(jp.packet.clone()).is_err() {
                    trace!("legacy output channel full, packet not mirrored");
                }
            }
            match &extended_tx {
                Some(tx) => match tx.try_send((jp.packet, jp.transport_key)) {
                    Ok(()) => delivered += 1,
                    Err(_) => {
                        dropped += 1;
                        warn!("jitter output consumer lagging, packet dropped");
                    }
                },
                None => dropped += 1,
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.packets_delivered += delivered as u64;
        inner.packets_dropped += dropped as u64;
        delivered
    }

    /// Spawn the drain worker. It wakes every 5 ms and releases due packets
    /// until the cancellation token fires or the buffer stops.
    pub fn start_drain(self: &std::sync::Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let buffer = self.clone();
        tokio::spawn(async move {
            debug!("jitter drain worker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DRAIN_TICK) => {
                        if buffer.stopped.load(AtomicOrdering::Acquire) {
                            break;
                        }
                        buffer.drain_due();
                    }
                }
            }
            debug!("jitter drain worker stopped");
        })
    }

    /// Stop the buffer: further enqueues fail, the heap is cleared and both
    /// output channels close once in-flight packets are consumed.
    pub fn stop(&self) {
        if self.stopped.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.heap.clear();
        inner.legacy_tx = None;
        inner.extended_tx = None;
        debug!("jitter buffer stopped");
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::Acquire)
    }

    /// Current heap occupancy
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    /// Snapshot the buffer statistics
    pub fn stats(&self) -> JitterBufferStats {
        let inner = self.inner.lock().unwrap();
        JitterBufferStats {
            packets_received: inner.packets_received,
            packets_dropped: inner.packets_dropped,
            packets_late: inner.packets_late,
            packets_delivered: inner.packets_delivered,
            buffered: inner.heap.len(),
            current_delay: inner.current_delay,
            target_delay: inner.target_delay,
        }
    }
}
