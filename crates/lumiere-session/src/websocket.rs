//! Session events and their WebSocket stream.
//!
//! Every observable change the orchestrator makes is broadcast as a
//! [`SessionEvent`]. A browser client renders from these events and plays the
//! `speak` / `camera_requested` commands through its own platform APIs.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current snapshot
//! - `mode_changed` - UI mode moved between capturing, analyzing and chatting
//! - `message_appended` - A message was added to the log
//! - `activity_changed` - Processing / listening / speaking flags changed
//! - `example_opened` / `example_closed` - Worked-example panel
//! - `notice` - A user-visible error
//! - `speak` / `cancel_speech` - Speech output commands
//! - `camera_requested` / `camera_released` - Camera stream commands
//! - `session_ended` - The user left the session
//!
//! # Example
//!
//! ```no_run
//! use lumiere_session::websocket::{EventBroadcaster, SessionEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::notice("Camera access required for vision analysis."));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::capture::CameraConstraints;
use crate::session_state::{Message, SessionSnapshot, SessionState, UiMode};
use crate::speech::Utterance;
use crate::tutor::TutorClient;

// ============================================================================
// Event Enum
// ============================================================================

/// Events describing session changes.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent when a client connects.
    Connected {
        /// The current session snapshot.
        snapshot: SessionSnapshot,
    },
    /// The UI mode changed.
    ModeChanged {
        /// Session number the change belongs to.
        session: u64,
        /// The new mode.
        mode: UiMode,
    },
    /// A message was appended to the log.
    MessageAppended {
        /// Session number the message belongs to.
        session: u64,
        /// The appended message.
        message: Message,
    },
    /// Activity flags changed.
    ActivityChanged {
        /// An AI request is in flight.
        processing: bool,
        /// Speech input is active.
        listening: bool,
        /// An utterance is being spoken.
        speaking: bool,
    },
    /// The worked-example panel opened.
    ExampleOpened {
        /// Session number the example belongs to.
        session: u64,
        /// Example text.
        content: String,
    },
    /// The worked-example panel closed.
    ExampleClosed {
        /// Session number.
        session: u64,
    },
    /// A user-visible error.
    Notice {
        /// Message to show.
        message: String,
    },
    /// Speak an utterance, replacing any active one.
    Speak {
        /// The utterance to speak.
        utterance: Utterance,
    },
    /// Stop any active utterance.
    CancelSpeech,
    /// Open the camera stream.
    CameraRequested {
        /// Stream constraints.
        constraints: CameraConstraints,
    },
    /// Release the camera stream.
    CameraReleased,
    /// The session was abandoned and its data discarded.
    SessionEnded {
        /// Session number that ended.
        session: u64,
    },
}

impl SessionEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(snapshot: SessionSnapshot) -> Self {
        Self::Connected { snapshot }
    }

    /// Creates an `ActivityChanged` event from the state flags.
    #[must_use]
    pub const fn activity(state: &SessionState) -> Self {
        Self::ActivityChanged {
            processing: state.processing,
            listening: state.listening,
            speaking: state.speaking,
        }
    }

    /// Creates a `Notice` event.
    #[must_use]
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ModeChanged { .. } => "mode_changed",
            Self::MessageAppended { .. } => "message_appended",
            Self::ActivityChanged { .. } => "activity_changed",
            Self::ExampleOpened { .. } => "example_opened",
            Self::ExampleClosed { .. } => "example_closed",
            Self::Notice { .. } => "notice",
            Self::Speak { .. } => "speak",
            Self::CancelSpeech => "cancel_speech",
            Self::CameraRequested { .. } => "camera_requested",
            Self::CameraReleased => "camera_released",
            Self::SessionEnded { .. } => "session_ended",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events and keeps the latest snapshot.
///
/// Events go through a tokio broadcast channel; the latest snapshot sits in a
/// watch channel so readers never wait on an in-flight AI request.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
    latest: Arc<watch::Sender<SessionSnapshot>>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The buffer size for each subscriber (typically 100)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let initial = SessionSnapshot::from_state(&SessionState::new(), 0, None);
        let (latest, _) = watch::channel(initial);
        Self {
            sender,
            latest: Arc::new(latest),
        }
    }

    /// Creates a new subscriber for receiving events.
    ///
    /// If a subscriber falls behind, it receives a `Lagged` error and misses
    /// some events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all subscribers.
    ///
    /// Returns the number of active receivers that will receive the event.
    pub fn send(&self, event: SessionEvent) -> usize {
        debug!(event = event.event_name(), "Broadcasting session event");
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Replaces the latest snapshot.
    pub fn publish_snapshot(&self, snapshot: SessionSnapshot) {
        self.latest.send_replace(snapshot);
    }

    /// Returns the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.latest.borrow().clone()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler<T: TutorClient>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<T>>>,
) -> Response {
    info!("New WebSocket connection request");
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// Handles a single WebSocket connection.
///
/// - Sends `connected` with the latest snapshot immediately
/// - Forwards all broadcast events to the client
/// - Sends heartbeat pings every 30 seconds
/// - Closes the connection after 3 missed pongs
async fn handle_socket(socket: WebSocket, broadcaster: EventBroadcaster) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no event falls in between.
    let mut event_receiver = broadcaster.subscribe();

    let connected = SessionEvent::connected(broadcaster.snapshot());
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(WsMessage::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent initial snapshot");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately; skip it.
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(WsMessage::Text(_) | WsMessage::Binary(_))) => {
                        // Operations go through the HTTP API
                        debug!("Ignoring data message from client");
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(session_event) => {
                        let json = match serde_json::to_string(&session_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
