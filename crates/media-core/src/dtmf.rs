//! RFC 4733 telephone-event (DTMF) support
//!
//! Covers the 4-byte wire payload, the six-packet send train and the
//! receive-side state machine. The receiver surfaces a digit on the first
//! packet of an event so the press is reported on press, not on release.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::packet::{RtpHeader, RtpPacket};

/// Telephone events always run at 8000 Hz regardless of the session codec
pub const DTMF_CLOCK_RATE: u32 = 8000;

/// Wire payload length of one event block
pub const DTMF_PAYLOAD_LEN: usize = 4;

/// End-of-event flag, bit 7 of the second payload byte
const END_BIT: u8 = 0x80;

/// Volume field mask, low six bits of the second payload byte
const VOLUME_MASK: u8 = 0x3F;

/// Packets sent per event: three starts followed by three ends
const START_PACKETS: usize = 3;
const END_PACKETS: usize = 3;

/// A decoded RFC 4733 event block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfEvent {
    /// Event code (0-9 digits, 10 `*`, 11 `#`, 12-15 A-D)
    pub event: u8,
    /// End-of-event flag
    pub end: bool,
    /// Volume as -dBm magnitude (0-63)
    pub volume: u8,
    /// Duration in RTP timestamp units at 8000 Hz
    pub duration: u16,
}

/// A recognized digit press, handed to the session's DTMF callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfDigitEvent {
    /// The pressed digit
    pub digit: char,
    /// Volume in dBm (zero or negative)
    pub volume_dbm: i32,
    /// Reported duration in RTP timestamp units
    pub duration: u16,
}

/// Map a digit character to its RFC 4733 event code
pub fn digit_to_event(digit: char) -> Result<u8> {
    match digit {
        '0'..='9' => Ok(digit as u8 - b'0'),
        '*' => Ok(10),
        '#' => Ok(11),
        'A'..='D' => Ok(digit as u8 - b'A' + 12),
        'a'..='d' => Ok(digit as u8 - b'a' + 12),
        other => Err(Error::DtmfInvalidDigit { digit: other }),
    }
}

/// Map an event code back to its digit character
pub fn event_to_digit(event: u8) -> Option<char> {
    match event {
        0..=9 => Some((b'0' + event) as char),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + event - 12) as char),
        _ => None,
    }
}

/// Clamp a dBm volume to the 6-bit wire magnitude.
///
/// Telephone-event volume is the negated dBm level; anything at or above
/// 0 dBm maps to 0 and anything below -63 dBm saturates at 63.
pub fn clamp_volume(volume_dbm: i32) -> u8 {
    if volume_dbm >= 0 {
        0
    } else {
        (-volume_dbm).min(63) as u8
    }
}

/// Convert an event duration to RTP timestamp units at the 8000 Hz
/// telephone-event clock
pub fn duration_to_units(duration: Duration) -> u16 {
    let units = duration.as_millis() as u64 * DTMF_CLOCK_RATE as u64 / 1000;
    units.min(u16::MAX as u64) as u16
}

/// Serialize one event block (reserved bit always zero)
pub fn encode_payload(event: &DtmfEvent) -> [u8; DTMF_PAYLOAD_LEN] {
    let end_bit = if event.end { END_BIT } else { 0 };
    let duration = event.duration.to_be_bytes();
    [
        event.event,
        end_bit | (event.volume & VOLUME_MASK),
        duration[0],
        duration[1],
    ]
}

/// Parse one event block from a telephone-event payload
pub fn parse_payload(payload: &[u8]) -> Result<DtmfEvent> {
    if payload.len() < DTMF_PAYLOAD_LEN {
        return Err(Error::dtmf_payload(
            "telephone-event payload shorter than one block",
            payload.len(),
        ));
    }
    Ok(DtmfEvent {
        event: payload[0],
        end: payload[1] & END_BIT != 0,
        volume: payload[1] & VOLUME_MASK,
        duration: u16::from_be_bytes([payload[2], payload[3]]),
    })
}

/// Builds the RTP packet trains for outgoing telephone events.
///
/// Keeps its own sequence counter; every packet of one event shares the
/// caller-supplied RTP timestamp and SSRC per RFC 4733 §2.5.1.2.
pub struct DtmfSender {
    payload_type: u8,
    sequence: u16,
}

impl DtmfSender {
    /// Create a sender for the negotiated telephone-event payload type
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            sequence: 1,
        }
    }

    /// Build the six packets for one digit press: three start/continuation
    /// packets (the first with the marker bit set) followed by three end
    /// packets, sequence numbers advancing across all six.
    pub fn build_event_packets(
        &mut self,
        digit: char,
        duration: Duration,
        volume_dbm: i32,
        timestamp: u32,
        ssrc: u32,
    ) -> Result<Vec<RtpPacket>> {
        let event = digit_to_event(digit)?;
        let volume = clamp_volume(volume_dbm);
        let duration_units = duration_to_units(duration);

        let mut packets = Vec::with_capacity(START_PACKETS + END_PACKETS);
        for i in 0..START_PACKETS + END_PACKETS {
            let payload = encode_payload(&DtmfEvent {
                event,
                end: i >= START_PACKETS,
                volume,
                duration: duration_units,
            });
            let mut header = RtpHeader::new(self.payload_type, self.sequence, timestamp, ssrc);
            header.marker = i == 0;
            self.sequence = self.sequence.wrapping_add(1);
            packets.push(RtpPacket::new(header, Bytes::copy_from_slice(&payload)));
        }

        debug!(
            "built dtmf event train: digit={} volume=-{}dBm duration={} units",
            digit, volume, duration_units
        );
        Ok(packets)
    }
}

/// Receive-side state machine for telephone events.
///
/// Fires exactly one digit event per contiguous same-digit train, on the
/// first packet seen. End packets clear the state without firing.
pub struct DtmfReceiver {
    event_active: bool,
    last_event: Option<u8>,
}

impl DtmfReceiver {
    /// Create an idle receiver
    pub fn new() -> Self {
        Self {
            event_active: false,
            last_event: None,
        }
    }

    /// Process one telephone-event packet.
    ///
    /// Returns `Some` exactly when a new digit press is recognized;
    /// continuation packets and end packets return `None`.
    pub fn process_packet(&mut self, packet: &RtpPacket) -> Result<Option<DtmfDigitEvent>> {
        let event = parse_payload(&packet.payload)?;

        if event.end {
            trace!("dtmf event {} ended after {} units", event.event, event.duration);
            self.event_active = false;
            self.last_event = None;
            return Ok(None);
        }

        let is_new = !self.event_active || self.last_event != Some(event.event);
        self.event_active = true;
        self.last_event = Some(event.event);

        if !is_new {
            return Ok(None);
        }

        let digit = event_to_digit(event.event).ok_or_else(|| {
            Error::dtmf_payload(
                format!("unknown telephone-event code {}", event.event),
                packet.payload.len(),
            )
        })?;

        Ok(Some(DtmfDigitEvent {
            digit,
            volume_dbm: -(event.volume as i32),
            duration: event.duration,
        }))
    }
}

impl Default for DtmfReceiver {
    fn default() -> Self {
        Self::new()
    }
}
