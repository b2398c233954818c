//! Callback slots for media session events
//!
//! Callbacks live behind the session's callbacks lock. Invocation sites
//! clone the slot handles under the lock and call them with no session
//! locks held, so a callback can call back into the session freely.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::dtmf::DtmfDigitEvent;
use crate::error::Error;
use crate::packet::RtpPacket;
use crate::types::RtcpStatistics;

/// Decoded audio delivered after codec processing
pub type AudioReceivedCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Undecoded audio payload, handed over before codec processing
pub type RawAudioReceivedCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Whole inbound packet with the key of the transport it arrived on;
/// installing this bypasses jitter buffering and decoding entirely
pub type RawPacketReceivedCallback = Arc<dyn Fn(RtpPacket, String) + Send + Sync>;

/// A recognized DTMF digit press
pub type DtmfReceivedCallback = Arc<dyn Fn(DtmfDigitEvent) + Send + Sync>;

/// Asynchronous worker failure, with the originating transport key when known
pub type MediaErrorCallback = Arc<dyn Fn(Error, Option<String>) + Send + Sync>;

/// Aggregate RTCP statistics emitted by the RTCP worker
pub type RtcpReportCallback = Arc<dyn Fn(RtcpStatistics) + Send + Sync>;

/// The session's callback slots, all optional
#[derive(Clone, Default)]
pub struct MediaSessionCallbacks {
    /// Decoded audio frames
    pub on_audio_received: Option<AudioReceivedCallback>,
    /// Undecoded audio payloads
    pub on_raw_audio_received: Option<RawAudioReceivedCallback>,
    /// Raw packets, bypassing the receive pipeline
    pub on_raw_packet_received: Option<RawPacketReceivedCallback>,
    /// DTMF digit presses
    pub on_dtmf_received: Option<DtmfReceivedCallback>,
    /// Worker-side errors
    pub on_media_error: Option<MediaErrorCallback>,
    /// Periodic RTCP reports
    pub on_rtcp_report: Option<RtcpReportCallback>,
}

impl fmt::Debug for MediaSessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSessionCallbacks")
            .field("on_audio_received", &self.on_audio_received.is_some())
            .field("on_raw_audio_received", &self.on_raw_audio_received.is_some())
            .field("on_raw_packet_received", &self.on_raw_packet_received.is_some())
            .field("on_dtmf_received", &self.on_dtmf_received.is_some())
            .field("on_media_error", &self.on_media_error.is_some())
            .field("on_rtcp_report", &self.on_rtcp_report.is_some())
            .finish()
    }
}
