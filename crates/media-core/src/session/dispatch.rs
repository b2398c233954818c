//! Receive dispatcher: classifies inbound packets and routes them
//!
//! Each transport gets one [`TransportPacketSink`] closing over its key, so
//! the dispatcher always knows which transport a packet arrived on. The sink
//! holds only a weak reference to the session; once the session drops, the
//! transport delivers into nothing.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tracing::trace;

use crate::packet::RtpPacket;
use crate::transport::PacketSink;

use super::SessionInner;

/// Per-transport inbound packet sink registered with the transport
pub(super) struct TransportPacketSink {
    pub(super) session: Weak<SessionInner>,
    pub(super) transport_key: String,
}

#[async_trait]
impl PacketSink for TransportPacketSink {
    async fn deliver(&self, packet: RtpPacket) {
        if let Some(inner) = self.session.upgrade() {
            dispatch_packet(&inner, packet, &self.transport_key).await;
        }
    }
}

/// Route one inbound packet through the receive policy.
///
/// Order: receive capability gate, DTMF, raw-packet bypass, jitter buffer,
/// direct audio delivery. Per-packet failures go to the media-error
/// callback; the pipeline itself never stops.
pub(super) async fn dispatch_packet(inner: &Arc<SessionInner>, packet: RtpPacket, key: &str) {
    if !inner.session_can_receive().await {
        trace!("dropping packet on {}: session cannot receive", key);
        return;
    }

    if inner.dtmf_enabled && packet.header.payload_type == inner.dtmf_payload_type {
        if let Some(receiver) = &inner.dtmf_receiver {
            let outcome = receiver.lock().await.process_packet(&packet);
            match outcome {
                Ok(press) => {
                    // Continuation and end packets are recognized traffic
                    // too; they keep the activity clock moving
                    {
                        let mut stats = inner.stats.write().await;
                        stats.last_activity = Instant::now();
                        if press.is_some() {
                            stats.dtmf_events_received += 1;
                        }
                    }
                    if let Some(press) = press {
                        let callback = inner.callbacks_snapshot().await.on_dtmf_received;
                        if let Some(callback) = callback {
                            callback(press);
                        }
                    }
                }
                Err(err) => inner.report_error(err, Some(key.to_string())).await,
            }
        }
        // DTMF packets never fall through to the audio path
        return;
    }

    let raw_packet_callback = inner.callbacks_snapshot().await.on_raw_packet_received;
    if let Some(callback) = raw_packet_callback {
        {
            let mut stats = inner.stats.write().await;
            stats.audio_packets_received += 1;
            stats.audio_bytes_received += packet.payload.len() as u64;
            stats.last_activity = Instant::now();
        }
        callback(packet, key.to_string());
        return;
    }

    if let Some(jitter) = &inner.jitter {
        if let Err(err) = jitter.put(packet, key) {
            inner.report_error(err, Some(key.to_string())).await;
        }
        // The jitter output consumer re-enters deliver_audio once the
        // packet's play time arrives
        return;
    }

    deliver_audio(inner, packet, key).await;
}

/// Final audio delivery: raw payload first, then decoded audio.
///
/// Runs directly for unbuffered sessions and from the jitter output
/// consumer otherwise. Packets with a foreign payload type are dropped.
pub(super) async fn deliver_audio(inner: &Arc<SessionInner>, packet: RtpPacket, key: &str) {
    if packet.header.payload_type != inner.payload_type.as_u8() {
        trace!(
            "dropping packet with unknown payload type {} on {}",
            packet.header.payload_type,
            key
        );
        return;
    }

    {
        let mut stats = inner.stats.write().await;
        stats.audio_packets_received += 1;
        stats.audio_bytes_received += packet.payload.len() as u64;
        stats.last_activity = Instant::now();
    }

    let callbacks = inner.callbacks_snapshot().await;

    if let Some(callback) = &callbacks.on_raw_audio_received {
        callback(packet.payload.clone());
    }

    if let Some(callback) = &callbacks.on_audio_received {
        let decoded = {
            let mut processor = inner.processor.lock().await;
            processor.process_incoming(&packet.payload)
        };
        match decoded {
            Ok(audio) => callback(audio),
            Err(err) => inner.report_error(err, Some(key.to_string())).await,
        }
    }
}
