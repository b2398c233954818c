//! Error handling for the media session core
//!
//! One error type covers the whole crate. Variants carry the session id and
//! the domain values a caller needs to act on the failure; transport I/O
//! causes are chained so nothing is lost on the way up.

use thiserror::Error;

use crate::types::MediaDirection;

/// Result type alias for media session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause for failures originating inside a transport
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the media session core
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires a started session
    #[error("session {session_id} not started")]
    SessionNotStarted { session_id: String },

    /// `start()` called on a session that already left Idle
    #[error("session {session_id} already started")]
    SessionAlreadyStarted { session_id: String },

    /// Operation on a closed session
    #[error("session {session_id} is closed")]
    SessionClosed { session_id: String },

    /// The session's transports do not permit the requested flow
    #[error("session {session_id} direction {direction} does not allow {operation}")]
    SessionInvalidDirection {
        session_id: String,
        direction: MediaDirection,
        operation: &'static str,
    },

    /// Configuration rejected at construction time
    #[error("invalid session configuration: {details}")]
    SessionInvalidConfig { details: String },

    /// Audio frame does not match the expected payload size
    #[error(
        "invalid audio frame size for session {session_id}: expected {expected} bytes, got {actual} \
         ({payload_type} at {clock_rate}Hz, ptime {ptime_ms}ms)"
    )]
    AudioSizeInvalid {
        session_id: String,
        expected: usize,
        actual: usize,
        payload_type: u8,
        clock_rate: u32,
        ptime_ms: u64,
    },

    /// Codec processing failed
    #[error("audio processing failed: {reason}")]
    AudioProcessingFailed { reason: String },

    /// Payload type has no codec implementation behind it
    #[error("codec unsupported for payload type {payload_type} ({operation})")]
    AudioCodecUnsupported {
        payload_type: u8,
        operation: &'static str,
    },

    /// Requested ptime is outside the lawful range
    #[error("invalid packet time {ptime_ms}ms: must be between {min_ms}ms and {max_ms}ms")]
    AudioTimingInvalid {
        ptime_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    /// A send FIFO refused more data
    #[error("audio send buffer full for transport {transport_key} ({occupancy} bytes buffered)")]
    AudioBufferFull {
        transport_key: String,
        occupancy: usize,
    },

    /// Transport key lookup failed, or the key is already taken
    #[error("rtp session {transport_key} on session {session_id}: {details}")]
    RtpSessionNotFound {
        session_id: String,
        transport_key: String,
        details: String,
    },

    /// A transport failed to write an audio frame or packet
    #[error("rtp send failed on transport {transport_key}")]
    RtpSendFailed {
        transport_key: String,
        #[source]
        source: TransportError,
    },

    /// DTMF operation on a session configured without DTMF
    #[error("dtmf not enabled for session {session_id}")]
    DtmfNotEnabled { session_id: String },

    /// Character has no RFC 4733 event mapping
    #[error("invalid dtmf digit {digit:?}")]
    DtmfInvalidDigit { digit: char },

    /// Telephone-event payload failed to parse
    #[error("invalid dtmf payload: {details} ({len} bytes)")]
    DtmfInvalidPayload { details: String, len: usize },

    /// Transport refused one of the DTMF event packets
    #[error("dtmf send failed on transport {transport_key}")]
    DtmfSendFailed {
        transport_key: String,
        #[source]
        source: TransportError,
    },

    /// RTCP operation on a session with RTCP disabled
    #[error("rtcp not enabled for session {session_id}")]
    RtcpNotEnabled { session_id: String },

    /// A transport failed to emit an RTCP report
    #[error("rtcp send failed on transport {transport_key}")]
    RtcpSendFailed {
        transport_key: String,
        #[source]
        source: TransportError,
    },

    /// Jitter buffer hit its hard occupancy cap
    #[error("jitter buffer full: {occupancy} packets buffered (hard cap {hard_cap})")]
    JitterBufferFull { occupancy: usize, hard_cap: usize },

    /// Enqueue after the jitter buffer was stopped
    #[error("jitter buffer stopped")]
    JitterBufferStopped,

    /// Jitter buffer configuration rejected
    #[error("invalid jitter buffer configuration: {details}")]
    JitterBufferConfigInvalid { details: String },
}

impl Error {
    /// Create a configuration error
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::SessionInvalidConfig {
            details: details.into(),
        }
    }

    /// Create a processing error
    pub fn processing_failed(reason: impl Into<String>) -> Self {
        Self::AudioProcessingFailed {
            reason: reason.into(),
        }
    }

    /// Create a duplicate / missing transport key error
    pub fn rtp_session(
        session_id: impl Into<String>,
        transport_key: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::RtpSessionNotFound {
            session_id: session_id.into(),
            transport_key: transport_key.into(),
            details: details.into(),
        }
    }

    /// Create a DTMF payload parse error
    pub fn dtmf_payload(details: impl Into<String>, len: usize) -> Self {
        Self::DtmfInvalidPayload {
            details: details.into(),
            len,
        }
    }

    /// Whether the failure is transient and the operation may be retried.
    ///
    /// Everything else signals configuration or life-cycle misuse and calls
    /// for caller intervention rather than a retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AudioBufferFull { .. }
                | Self::JitterBufferFull { .. }
                | Self::RtpSendFailed { .. }
                | Self::RtcpSendFailed { .. }
        )
    }
}
