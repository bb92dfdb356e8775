mod common;

use bytes::Bytes;
use common::{candidate_line, statuses, EngineCall, Harness};
use serde_json::json;
use sfu_signal::error::ChannelError;
use sfu_signal::peer::{
    ConnectionState, EngineEvent, IceCandidateInit, NegotiationConfig, Phase, TrackInfo, TrackKind,
};
use sfu_signal::presenter::{ResourceHandle, UiSignal};
use sfu_signal::signaling::{ChannelEvent, Transport};
use sfu_signal::SessionEvent;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::sleep;

fn track(stream: &str, kind: TrackKind) -> TrackInfo {
    TrackInfo {
        track_id: format!("{stream}-{kind}"),
        kind,
        stream_id: stream.to_string(),
        participant_id: None,
    }
}

fn without_status(signals: Vec<UiSignal>) -> Vec<UiSignal> {
    signals
        .into_iter()
        .filter(|s| !matches!(s, UiSignal::Status { .. }))
        .collect()
}

#[tokio::test]
async fn two_tracks_one_stream() {
    let mut h = Harness::new("room1");
    h.joined().await;
    h.ui_signals();

    h.feed(EngineEvent::TrackAdded(track("s1", TrackKind::Video))).await;
    h.feed(EngineEvent::TrackAdded(track("s1", TrackKind::Audio))).await;
    assert_eq!(
        without_status(h.ui_signals()),
        vec![
            UiSignal::ResourceCreated {
                handle: ResourceHandle(1),
                stream_id: "s1".into(),
                participant_id: None,
            },
            UiSignal::Attach {
                stream_id: "s1".into(),
                kind: TrackKind::Video,
            },
            UiSignal::Attach {
                stream_id: "s1".into(),
                kind: TrackKind::Audio,
            },
        ]
    );

    h.feed(EngineEvent::TrackRemoved(track("s1", TrackKind::Video))).await;
    assert_eq!(
        without_status(h.ui_signals()),
        vec![UiSignal::Detach {
            stream_id: "s1".into(),
            kind: TrackKind::Video,
        }]
    );
    assert_eq!(h.session.registry().len(), 1);

    h.feed(EngineEvent::TrackRemoved(track("s1", TrackKind::Audio))).await;
    assert_eq!(
        without_status(h.ui_signals()),
        vec![
            UiSignal::Detach {
                stream_id: "s1".into(),
                kind: TrackKind::Audio,
            },
            UiSignal::ResourceDestroyed {
                stream_id: "s1".into(),
            },
        ]
    );
    assert!(h.session.registry().is_empty());
}

#[tokio::test]
async fn removal_without_creation_is_reported() {
    let mut h = Harness::new("room1");
    h.feed(EngineEvent::TrackRemoved(track("ghost", TrackKind::Audio))).await;

    let signals = h.ui_signals();
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        &signals[0],
        UiSignal::Status { message, is_error: true } if message.contains("without matching creation")
    ));
}

#[tokio::test]
async fn local_close_cancels_calls_and_tears_down() {
    let mut h = Harness::new("room1");
    h.feed(ChannelEvent::Opened).await;
    h.feed(EngineEvent::TrackAdded(track("s1", TrackKind::Video))).await;
    h.feed(EngineEvent::TrackAdded(track("s1", TrackKind::Audio))).await;
    h.ui_signals();
    assert_eq!(h.session.pending_calls(), 1);

    let flow = h.session.handle(SessionEvent::Close).await;
    assert!(matches!(flow, ControlFlow::Break(Ok(()))));
    assert_eq!(h.session.phase(), Phase::Closed);
    assert_eq!(h.session.pending_calls(), 0);
    assert!(h.transport.is_closed());
    assert_eq!(h.engine.calls().last(), Some(&EngineCall::Close));
    assert_eq!(
        without_status(h.ui_signals()),
        vec![
            UiSignal::Detach {
                stream_id: "s1".into(),
                kind: TrackKind::Audio,
            },
            UiSignal::Detach {
                stream_id: "s1".into(),
                kind: TrackKind::Video,
            },
            UiSignal::ResourceDestroyed {
                stream_id: "s1".into(),
            },
        ]
    );

    let sent = h.transport.sent().len();
    let flow = h
        .session
        .handle(EngineEvent::IceCandidate(Some(IceCandidateInit::new(candidate_line(1)))).into())
        .await;
    assert!(matches!(flow, ControlFlow::Break(Ok(()))));
    assert_eq!(h.transport.sent().len(), sent);
}

#[tokio::test]
async fn remote_close_is_terminal() {
    let mut h = Harness::new("room1");
    h.joined().await;
    h.feed(EngineEvent::TrackAdded(track("s1", TrackKind::Video))).await;

    let flow = h
        .session
        .handle(
            ChannelEvent::Closed {
                code: 1006,
                reason: "gone".into(),
            }
            .into(),
        )
        .await;
    assert!(matches!(
        flow,
        ControlFlow::Break(Err(ChannelError::UnexpectedClose { code: 1006, .. }))
    ));
    assert_eq!(h.session.phase(), Phase::Closed);
    assert!(h.session.registry().is_empty());
    assert!(h
        .statuses()
        .iter()
        .any(|(m, is_error)| *is_error && m.starts_with("Connection closed (code: 1006)")));
}

#[tokio::test]
async fn normal_close_ends_cleanly() {
    let mut h = Harness::new("room1");
    h.joined().await;

    let flow = h
        .session
        .handle(
            ChannelEvent::Closed {
                code: 1000,
                reason: String::new(),
            }
            .into(),
        )
        .await;
    assert!(matches!(flow, ControlFlow::Break(Ok(()))));
}

#[tokio::test]
async fn send_failure_ends_the_session() {
    let mut h = Harness::new("room1");
    h.transport.close().await.unwrap();

    let flow = h.session.handle(ChannelEvent::Opened.into()).await;
    assert!(matches!(flow, ControlFlow::Break(Err(ChannelError::Closed))));
    assert_eq!(h.session.phase(), Phase::Closed);
}

#[tokio::test(start_paused = true)]
async fn join_timeout_returns_to_idle() {
    let mut config = NegotiationConfig::new("room1");
    config.join_timeout = Some(Duration::from_secs(5));
    let Harness {
        session,
        transport,
        mut ui,
        events,
        ..
    } = Harness::with_config(config);

    events.push(ChannelEvent::Opened);
    let task = tokio::spawn(session.run());

    sleep(Duration::from_secs(6)).await;
    assert_eq!(transport.methods(), ["join"]);
    assert!(statuses(&mut ui)
        .iter()
        .any(|(m, is_error)| *is_error && m.contains("no answer for join within 5s")));

    // поздний ответ уже не соответствует ни одному вызову
    let late = json!({"jsonrpc": "2.0", "id": 1, "result": {"type": "answer", "sdp": "late"}});
    events.push(ChannelEvent::Message(Bytes::from(late.to_string())));
    events.join();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.methods(), ["join", "join"]);
    assert_eq!(transport.sent()[1]["id"], 2);
    assert!(statuses(&mut ui)
        .iter()
        .any(|(m, _)| m.contains("response for unknown call id 1")));

    events.close();
    assert!(task.await.unwrap().is_ok());
    assert!(transport.is_closed());
}

#[tokio::test(start_paused = true)]
async fn media_that_never_recovers_is_reported() {
    let Harness {
        session,
        mut ui,
        events,
        ..
    } = Harness::new("room1");

    events.push(EngineEvent::ConnectionStateChanged(ConnectionState::Disconnected));
    let task = tokio::spawn(session.run());

    sleep(Duration::from_secs(9)).await;
    let early = statuses(&mut ui);
    assert!(early.contains(&("Connection disconnected. Try refreshing.".to_string(), true)));
    assert!(!early.iter().any(|(m, _)| m == "Connection failed: media did not recover"));

    sleep(Duration::from_secs(2)).await;
    assert!(statuses(&mut ui).contains(&("Connection failed: media did not recover".to_string(), true)));

    drop(events);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn media_recovering_within_grace_is_not_a_failure() {
    let Harness {
        session,
        mut ui,
        events,
        ..
    } = Harness::new("room1");

    events.push(EngineEvent::ConnectionStateChanged(ConnectionState::Failed));
    let task = tokio::spawn(session.run());
    sleep(Duration::from_secs(2)).await;
    events.push(EngineEvent::ConnectionStateChanged(ConnectionState::Connected));
    sleep(Duration::from_secs(20)).await;

    let seen = statuses(&mut ui);
    assert!(seen.contains(&("Streaming from room: room1".to_string(), false)));
    assert!(!seen.iter().any(|(m, _)| m == "Connection failed: media did not recover"));

    events.close();
    assert!(task.await.unwrap().is_ok());
}
