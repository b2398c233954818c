//! # Media session core for the softphone project
//!
//! `softphone-media-core` terminates the RTP audio streams of one call. It
//! owns the paced send pipeline with per-transport byte FIFOs, the receive
//! pipeline with its reordering jitter buffer and codec processing, the
//! RFC 4733 telephone-event machinery, and session-level RTCP bookkeeping
//! aggregated across every underlying transport.
//!
//! ## Core Components
//!
//! - **MediaSession**: per-call controller owning life cycle, callbacks and
//!   statistics
//! - **AudioProcessor**: frame validation and per-payload-type transforms
//! - **JitterBuffer**: timestamp-ordered reordering with adaptive delay
//! - **DtmfSender / DtmfReceiver**: RFC 4733 telephone events
//! - **MediaTransport**: the contract the surrounding stack implements to
//!   plug sockets into the session
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use softphone_media_core::{MediaSession, MediaSessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = MediaSession::new(MediaSessionConfig {
//!         session_id: "call-1".to_string(),
//!         ..Default::default()
//!     })?;
//!
//!     session.add_rtp_session("main", my_transport).await?;
//!     session.start().await?;
//!     // feed frames with session.send_audio(...)
//!     session.stop().await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod codec;
pub mod dtmf;
pub mod error;
pub mod jitter;
pub mod packet;
pub mod session;
pub mod transport;
pub mod types;

// Send-side FIFO plumbing, internal to the session
mod pacer;

// Re-export core types
pub use error::{Error, Result, TransportError};
pub use types::*;

// Re-export session components
pub use session::{MediaSession, MediaSessionCallbacks, MediaSessionConfig};

// Re-export packet model and transport contract
pub use packet::{RtpHeader, RtpPacket};
pub use transport::{MediaTransport, PacketSink, TransportResult, TransportState};

// Re-export the remaining component surfaces
pub use codec::{AudioProcessor, AudioProcessorConfig};
pub use dtmf::{DtmfDigitEvent, DtmfEvent, DtmfReceiver, DtmfSender};
pub use jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::dtmf::{DtmfDigitEvent, DtmfEvent};
    pub use crate::error::{Error, Result};
    pub use crate::jitter::{JitterBufferConfig, JitterBufferStats};
    pub use crate::packet::{RtpHeader, RtpPacket};
    pub use crate::session::{MediaSession, MediaSessionCallbacks, MediaSessionConfig};
    pub use crate::transport::{
        MediaTransport, PacketSink, TransportResult, TransportState,
    };
    pub use crate::types::{
        AudioPayloadType, MediaDirection, MediaSessionStats, RtcpStatistics,
        RtcpStatsSnapshot, SessionState, TransportStats, DEFAULT_DTMF_PAYLOAD_TYPE,
    };
}
