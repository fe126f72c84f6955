//! Integration tests for the session event stream.
//!
//! These tests validate connection handling, the order of events produced by
//! a capture, and broadcasting to several clients.

mod common;

use std::time::Duration;

use common::{FakeGemini, TestApp};
use futures::SinkExt;
use futures::StreamExt;
use lumiere_session::{FacingMode, SessionEvent, UiMode};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message and parses it as a `SessionEvent`.
/// Ping frames are answered with pong.
async fn receive_event(client: &mut WsClient) -> SessionEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects events up to and including the first one matching `done`.
async fn receive_until(
    client: &mut WsClient,
    done: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = receive_event(client).await;
        let finished = done(&event);
        events.push(event);
        if finished {
            return events;
        }
    }
}

/// Index of the first event matching `wanted`.
fn position_of(events: &[SessionEvent], wanted: impl Fn(&SessionEvent) -> bool) -> usize {
    events
        .iter()
        .position(wanted)
        .expect("expected event missing")
}

// ============================================================================
// Connection Tests
// ============================================================================

/// The first event on a new connection is `connected` with the snapshot.
#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let app = TestApp::spawn(FakeGemini::new()).await;

    let mut client = connect_client(&app.ws_url).await;
    let event = receive_event(&mut client).await;

    match event {
        SessionEvent::Connected { snapshot } => {
            assert_eq!(snapshot.session, 0);
            assert_eq!(snapshot.mode, UiMode::Capturing);
            assert!(snapshot.messages.is_empty());
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

/// A client joining mid-session sees the current conversation.
#[tokio::test]
async fn test_connected_event_contains_current_session() {
    let gemini = FakeGemini::new();
    gemini.reply("What did you do with the exponent?");
    let app = TestApp::spawn(gemini).await;

    assert!(app.capture().await.status().is_success());

    let mut client = connect_client(&app.ws_url).await;
    match receive_event(&mut client).await {
        SessionEvent::Connected { snapshot } => {
            assert_eq!(snapshot.session, 1);
            assert_eq!(snapshot.mode, UiMode::Chatting);
            assert_eq!(snapshot.messages.len(), 1);
            assert!(snapshot.image_data_url.is_some());
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

/// Events are sent as `{ "event": ..., "payload": ... }` text frames.
#[tokio::test]
async fn test_event_wire_format() {
    let app = TestApp::spawn(FakeGemini::new()).await;
    let mut client = connect_client(&app.ws_url).await;

    let msg = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Timeout waiting for message")
        .expect("Stream ended")
        .expect("WebSocket error");
    let Message::Text(text) = msg else {
        panic!("Expected text frame");
    };

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["event"], "connected");
    assert_eq!(value["payload"]["snapshot"]["mode"], "capturing");
}

// ============================================================================
// Session Event Tests
// ============================================================================

/// Starting the session asks the client for the back camera.
#[tokio::test]
async fn test_start_requests_camera() {
    let app = TestApp::spawn(FakeGemini::new()).await;
    let mut client = connect_client(&app.ws_url).await;
    receive_event(&mut client).await;

    let response = app.post("/api/session/start", json!({})).await;
    assert!(response.status().is_success());

    match receive_event(&mut client).await {
        SessionEvent::CameraRequested { constraints } => {
            assert_eq!(constraints.facing, FacingMode::Environment);
            assert_eq!(constraints.ideal_width, 1920);
            assert_eq!(constraints.ideal_height, 1080);
        }
        other => panic!("Expected CameraRequested event, got: {other:?}"),
    }
}

/// A capture moves through analyzing to chatting and ends by speaking the hint.
#[tokio::test]
async fn test_capture_event_sequence() {
    let hint = "Okay. Which rule gives you the second line?";
    let gemini = FakeGemini::new();
    gemini.reply(hint);
    let app = TestApp::spawn(gemini).await;

    let mut client = connect_client(&app.ws_url).await;
    receive_event(&mut client).await;

    assert!(app.capture().await.status().is_success());

    let events = receive_until(&mut client, |e| matches!(e, SessionEvent::Speak { .. })).await;

    let analyzing = position_of(&events, |e| {
        matches!(e, SessionEvent::ModeChanged { mode: UiMode::Analyzing, .. })
    });
    let released = position_of(&events, |e| matches!(e, SessionEvent::CameraReleased));
    let appended = position_of(&events, |e| matches!(e, SessionEvent::MessageAppended { .. }));
    let chatting = position_of(&events, |e| {
        matches!(e, SessionEvent::ModeChanged { mode: UiMode::Chatting, .. })
    });

    assert!(analyzing < appended);
    assert!(released < appended);
    assert!(appended < chatting);

    match events.last() {
        Some(SessionEvent::Speak { utterance }) => {
            assert_eq!(utterance.text, hint);
            assert_eq!(utterance.lang, "en-US");
        }
        other => panic!("Expected Speak event, got: {other:?}"),
    }

    match &events[appended] {
        SessionEvent::MessageAppended { session, message } => {
            assert_eq!(*session, 1);
            assert_eq!(message.text, hint);
        }
        other => panic!("Expected MessageAppended event, got: {other:?}"),
    }
}

/// Leaving cancels speech and ends the session.
#[tokio::test]
async fn test_exit_ends_session() {
    let gemini = FakeGemini::new();
    gemini.reply("Look at the limits of integration.");
    let app = TestApp::spawn(gemini).await;

    assert!(app.capture().await.status().is_success());

    let mut client = connect_client(&app.ws_url).await;
    receive_event(&mut client).await;

    let response = app
        .http
        .delete(app.url("/api/session"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let events = receive_until(&mut client, |e| {
        matches!(e, SessionEvent::SessionEnded { .. })
    })
    .await;

    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::CancelSpeech)));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ModeChanged {
            mode: UiMode::Capturing,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded { session: 1 })
    ));
}

// ============================================================================
// Multiple Client Tests
// ============================================================================

/// Tests that events are broadcast to all connected clients.
#[tokio::test]
async fn test_events_broadcast_to_all_clients() {
    let app = TestApp::spawn(FakeGemini::new()).await;
    let broadcaster = app.state.broadcaster.clone();

    let mut client1 = connect_client(&app.ws_url).await;
    let mut client2 = connect_client(&app.ws_url).await;
    let mut client3 = connect_client(&app.ws_url).await;

    assert!(matches!(receive_event(&mut client1).await, SessionEvent::Connected { .. }));
    assert!(matches!(receive_event(&mut client2).await, SessionEvent::Connected { .. }));
    assert!(matches!(receive_event(&mut client3).await, SessionEvent::Connected { .. }));

    broadcaster.send(SessionEvent::notice("Camera access required for vision analysis."));

    for client in [&mut client1, &mut client2, &mut client3] {
        match receive_event(client).await {
            SessionEvent::Notice { message } => {
                assert_eq!(message, "Camera access required for vision analysis.");
            }
            other => panic!("Expected Notice event, got: {other:?}"),
        }
    }
}

/// A disconnecting client does not affect the others.
#[tokio::test]
async fn test_client_disconnect_is_isolated() {
    let app = TestApp::spawn(FakeGemini::new()).await;
    let broadcaster = app.state.broadcaster.clone();

    let mut staying = connect_client(&app.ws_url).await;
    let mut leaving = connect_client(&app.ws_url).await;
    receive_event(&mut staying).await;
    receive_event(&mut leaving).await;

    leaving.close(None).await.expect("Failed to close");
    drop(leaving);
    tokio::time::sleep(Duration::from_millis(50)).await;

    broadcaster.send(SessionEvent::CancelSpeech);
    assert!(matches!(
        receive_event(&mut staying).await,
        SessionEvent::CancelSpeech
    ));
}
