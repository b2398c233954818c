//! Receive pipeline through the jitter buffer: reordering, overflow and
//! dispatcher routing

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{audio_packet, MockTransport};
use serial_test::serial;
use softphone_media_core::prelude::*;

fn jitter_config(id: &str, buffer_size: usize, delay_ms: u64) -> MediaSessionConfig {
    common::init_tracing();
    MediaSessionConfig {
        session_id: id.to_string(),
        jitter_enabled: true,
        jitter_buffer_size: buffer_size,
        jitter_delay: Duration::from_millis(delay_ms),
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn test_reordered_packets_play_out_in_timestamp_order() {
    let (audio_tx, mut audio_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = jitter_config("reorder", 10, 40);
    config.callbacks.on_raw_audio_received = Some(Arc::new(move |payload| {
        let _ = audio_tx.send(payload[0]);
    }));
    let session = MediaSession::new(config).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    // Middle packet arrives last: seq 1000, 1002, 1001
    transport.inject(audio_packet(0, 1000, 8000, 1, 160)).await;
    transport.inject(audio_packet(0, 1002, 8320, 3, 160)).await;
    transport.inject(audio_packet(0, 1001, 8160, 2, 160)).await;

    let mut fills = Vec::new();
    for _ in 0..3 {
        let fill = tokio::time::timeout(Duration::from_secs(2), audio_rx.recv())
            .await
            .expect("jitter play-out must deliver")
            .unwrap();
        fills.push(fill);
    }
    assert_eq!(fills, vec![1, 2, 3], "delivery must follow timestamps");

    let stats = session.jitter_stats().await.unwrap();
    assert_eq!(stats.packets_received, 3);
    assert_eq!(stats.packets_late, 1);

    let session_stats = session.get_statistics().await;
    assert_eq!(session_stats.audio_packets_received, 3);
    assert_eq!(session_stats.audio_bytes_received, 480);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_decoded_audio_callback_sees_processed_payload() {
    let (audio_tx, mut audio_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = jitter_config("decode", 10, 20);
    config.callbacks.on_audio_received = Some(Arc::new(move |audio| {
        let _ = audio_tx.send(audio);
    }));
    let session = MediaSession::new(config).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    transport.inject(audio_packet(0, 1, 160, 0xAA, 160)).await;

    let decoded = tokio::time::timeout(Duration::from_secs(2), audio_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decoded.len(), 160);
    // PCMU wire bytes come back through the µ-law transform
    assert!(decoded.iter().all(|&b| b == !0xAAu8));

    session.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_overflow_keeps_heap_bounded_and_drops_oldest() {
    let session = MediaSession::new(jitter_config("overflow", 3, 60)).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    for i in 0..10u16 {
        transport
            .inject(audio_packet(0, 4000 + i, 8000 + i as u32 * 160, 0, 160))
            .await;
    }

    let stats = session.jitter_stats().await.unwrap();
    assert!(stats.buffered <= 3);
    assert!(stats.packets_dropped >= 7);
    assert_eq!(stats.packets_received, 10);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_payload_type_is_dropped() {
    let (audio_tx, mut audio_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = MediaSessionConfig {
        session_id: "unknown-pt".to_string(),
        ..Default::default()
    };
    config.callbacks.on_raw_audio_received = Some(Arc::new(move |payload| {
        let _ = audio_tx.send(payload);
    }));
    let session = MediaSession::new(config).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    // PT 18 is not the session codec (PCMU) and DTMF is disabled
    transport.inject(audio_packet(18, 1, 160, 0x00, 20)).await;
    transport.inject(audio_packet(0, 2, 320, 0x42, 160)).await;

    let delivered = tokio::time::timeout(Duration::from_secs(1), audio_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered[0], 0x42, "only the session PT is delivered");
    assert!(audio_rx.try_recv().is_err());

    let stats = session.get_statistics().await;
    assert_eq!(stats.audio_packets_received, 1);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_raw_packet_handler_bypasses_jitter_and_decode() {
    let (packet_tx, mut packet_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = jitter_config("bypass", 10, 60);
    config.callbacks.on_raw_packet_received = Some(Arc::new(move |packet, key| {
        let _ = packet_tx.send((packet, key));
    }));
    let session = MediaSession::new(config).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    transport.inject(audio_packet(0, 77, 1600, 0x10, 160)).await;

    // Raw handler fires immediately, no play-out delay involved
    let (packet, key) = tokio::time::timeout(Duration::from_millis(200), packet_rx.recv())
        .await
        .expect("raw handler must bypass the jitter buffer")
        .unwrap();
    assert_eq!(packet.header.sequence_number, 77);
    assert_eq!(packet.payload[0], 0x10, "payload must be undecoded");
    assert_eq!(key, "main");

    // The jitter buffer never saw the packet
    let stats = session.jitter_stats().await.unwrap();
    assert_eq!(stats.packets_received, 0);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_inactive_transport_drops_inbound_silently() {
    let (audio_tx, mut audio_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = MediaSessionConfig {
        session_id: "inactive".to_string(),
        ..Default::default()
    };
    config.callbacks.on_raw_audio_received = Some(Arc::new(move |payload| {
        let _ = audio_tx.send(payload);
    }));
    let session = MediaSession::new(config).unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::Inactive));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    transport.inject(audio_packet(0, 1, 160, 0x01, 160)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(audio_rx.try_recv().is_err());
    assert_eq!(session.get_statistics().await.audio_packets_received, 0);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_jitter_output() {
    let session = MediaSession::new(jitter_config("jitter-stop", 10, 60)).unwrap();
    let mut legacy = session.take_jitter_packet_receiver().unwrap();
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    session.start().await.unwrap();

    session.stop().await.unwrap();
    assert!(legacy.recv().await.is_none(), "stop closes the channels");
    assert!(session.jitter_stats().await.unwrap().buffered == 0);
}
