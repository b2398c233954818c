//! Session life-cycle and transport registry behavior

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockTransport;
use softphone_media_core::prelude::*;

fn session(id: &str) -> MediaSession {
    common::init_tracing();
    MediaSession::new(MediaSessionConfig {
        session_id: id.to_string(),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_new_rejects_empty_session_id() {
    let err = MediaSession::new(MediaSessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::SessionInvalidConfig { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_new_applies_defaults() {
    let session = MediaSession::new(MediaSessionConfig {
        session_id: "defaults".to_string(),
        ptime: Duration::ZERO,
        rtcp_interval: Duration::ZERO,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(session.payload_type(), AudioPayloadType::Pcmu);
    // Zero ptime falls back to 20 ms
    assert_eq!(
        tokio_test::block_on(session.expected_payload_size()),
        160
    );
}

#[tokio::test]
async fn test_start_stop_state_machine() {
    let session = session("lifecycle");
    assert_eq!(session.state().await, SessionState::Idle);

    session.start().await.unwrap();
    assert_eq!(session.state().await, SessionState::Active);

    // Second start is a life-cycle error
    assert!(matches!(
        session.start().await.unwrap_err(),
        Error::SessionAlreadyStarted { .. }
    ));

    session.stop().await.unwrap();
    assert_eq!(session.state().await, SessionState::Closed);

    // Stop is idempotent
    session.stop().await.unwrap();
    assert_eq!(session.state().await, SessionState::Closed);

    // A closed session cannot restart
    assert!(matches!(
        session.start().await.unwrap_err(),
        Error::SessionClosed { .. }
    ));
}

#[tokio::test]
async fn test_pause_refuses_sends_until_resume() {
    let session = session("pause");
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session.add_rtp_session("main", transport).await.unwrap();
    session.start().await.unwrap();

    session.pause().await.unwrap();
    assert_eq!(session.state().await, SessionState::Paused);
    assert!(session.send_audio(&[0u8; 160]).await.is_err());

    session.resume().await.unwrap();
    assert_eq!(session.state().await, SessionState::Active);
    session.send_audio(&[0u8; 160]).await.unwrap();

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_requires_started_session() {
    let session = session("pause-idle");
    assert!(matches!(
        session.pause().await.unwrap_err(),
        Error::SessionNotStarted { .. }
    ));
}

#[tokio::test]
async fn test_send_audio_requires_active_session() {
    let session = session("idle-send");
    let err = session.send_audio(&[0u8; 160]).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotStarted { .. }));
}

#[tokio::test]
async fn test_send_audio_requires_send_capable_transport() {
    let session = session("recvonly");
    let transport = Arc::new(MockTransport::new(MediaDirection::RecvOnly));
    session.add_rtp_session("main", transport).await.unwrap();
    session.start().await.unwrap();

    let err = session.send_audio(&[0u8; 160]).await.unwrap_err();
    assert!(matches!(err, Error::SessionInvalidDirection { .. }));

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_transport_key_rejected() {
    let session = session("dup");
    let first = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    let second = Arc::new(MockTransport::new(MediaDirection::SendRecv));

    session.add_rtp_session("main", first).await.unwrap();
    let err = session.add_rtp_session("main", second).await.unwrap_err();
    assert!(matches!(err, Error::RtpSessionNotFound { .. }));
}

#[tokio::test]
async fn test_remove_transport_revokes_handler() {
    let session = session("remove");
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    assert!(transport.has_incoming_handler());

    session.remove_rtp_session("main").await.unwrap();
    assert!(!transport.has_incoming_handler());
    assert_eq!(transport.state(), TransportState::Stopped);

    assert!(matches!(
        session.remove_rtp_session("main").await.unwrap_err(),
        Error::RtpSessionNotFound { .. }
    ));
}

#[tokio::test]
async fn test_stop_stops_transports_and_revokes_handlers() {
    let session = session("teardown");
    let transport = Arc::new(MockTransport::new(MediaDirection::SendRecv));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();

    session.start().await.unwrap();
    assert_eq!(transport.state(), TransportState::Running);

    session.stop().await.unwrap();
    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(!transport.has_incoming_handler());
}

#[tokio::test]
async fn test_effective_direction_follows_transports() {
    let session = session("direction");
    assert_eq!(session.direction().await, MediaDirection::Inactive);
    assert!(!session.can_send().await);

    let transport = Arc::new(MockTransport::new(MediaDirection::SendOnly));
    session
        .add_rtp_session("main", transport.clone())
        .await
        .unwrap();
    assert_eq!(session.direction().await, MediaDirection::SendOnly);

    session
        .set_transport_direction("main", MediaDirection::SendRecv)
        .await
        .unwrap();
    assert_eq!(
        session.transport_direction("main").await.unwrap(),
        MediaDirection::SendRecv
    );
    assert!(session.can_receive().await);
}

#[tokio::test]
async fn test_silence_suppression_toggle_is_stored() {
    let session = session("vad-stub");
    assert!(!session.silence_suppression());
    session.set_silence_suppression(true);
    assert!(session.silence_suppression());
    session.set_silence_suppression(false);
    assert!(!session.silence_suppression());
}

#[tokio::test]
async fn test_housekeeping_updates_uptime() {
    let session = session("uptime");
    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = session.get_statistics().await;
    assert!(stats.uptime >= Duration::from_millis(20));
    session.stop().await.unwrap();
}
