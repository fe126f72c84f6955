//! Session state types for the Lumiere orchestrator.
//!
//! This module defines the explicit state object owned by the orchestrator:
//! the UI mode, the append-only message log, activity flags, the example
//! panel and the user-visible notice. Nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LumiereError, Result};

// ============================================================================
// UiMode
// ============================================================================

/// Which stage of a tutoring session the user is in.
///
/// The mode transitions through these states:
/// - `Capturing` -> `Analyzing` (a frame was taken)
/// - `Analyzing` -> `Chatting` (the AI produced the first hint)
/// - `Analyzing` -> `Capturing` (analysis failed)
/// - `Chatting` -> `Capturing` (the user left the session)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    /// Live camera view; the camera stream is held.
    #[default]
    Capturing,
    /// The captured frame is being analyzed.
    Analyzing,
    /// Voice dialogue about the captured work.
    Chatting,
}

impl UiMode {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// # Examples
    ///
    /// ```
    /// use lumiere_session::UiMode;
    ///
    /// assert!(UiMode::Capturing.can_transition_to(UiMode::Analyzing));
    /// assert!(UiMode::Analyzing.can_transition_to(UiMode::Capturing));
    /// assert!(!UiMode::Capturing.can_transition_to(UiMode::Chatting));
    /// ```
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Capturing, Self::Analyzing)
                | (Self::Analyzing, Self::Chatting | Self::Capturing)
                | (Self::Chatting | Self::Capturing, Self::Capturing)
        )
    }
}

impl std::fmt::Display for UiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capturing => write!(f, "capturing"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Chatting => write!(f, "chatting"),
        }
    }
}

// ============================================================================
// Message and MessageLog
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner.
    User,
    /// The AI tutor.
    Model,
}

/// One entry of the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Position-unique identifier within the log.
    pub id: u64,
    /// Author of the message.
    pub role: Role,
    /// Message text as produced by the user or the model.
    pub text: String,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
}

/// Insertion-ordered, append-only message log.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    /// Appends a message and returns it.
    pub fn push(&mut self, role: Role, text: impl Into<String>) -> &Message {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let index = self.messages.len();
        self.messages.push(Message {
            id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
        &self.messages[index]
    }

    /// Returns all messages in insertion order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the log holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the most recent message.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drops the whole log. Only used when a session ends.
    pub(crate) fn discard(&mut self) {
        self.messages.clear();
    }
}

// ============================================================================
// ExamplePanel
// ============================================================================

/// The side panel showing a worked example.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamplePanel {
    /// Whether the panel is visible.
    pub open: bool,
    /// Last generated example, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ============================================================================
// SessionState
// ============================================================================

/// Everything the orchestrator owns besides the adapters and the AI context.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Current UI mode.
    pub mode: UiMode,
    /// An AI request is in flight.
    pub processing: bool,
    /// Speech input is active.
    pub listening: bool,
    /// An utterance is being spoken.
    pub speaking: bool,
    /// Conversation of the current session.
    pub log: MessageLog,
    /// Worked-example side panel.
    pub example: ExamplePanel,
    /// User-visible error, shown until retried or cleared.
    pub notice: Option<String>,
}

impl SessionState {
    /// Creates a fresh state in `Capturing` mode.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: MessageLog::new(),
            ..Default::default()
        }
    }

    /// Moves to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::InvalidStateTransition` if the transition is not allowed.
    pub fn transition(&mut self, next: UiMode) -> Result<()> {
        if !self.mode.can_transition_to(next) {
            return Err(LumiereError::invalid_transition(self.mode, next));
        }
        self.mode = next;
        Ok(())
    }

    /// Drops the conversation, panel and notice of the current session.
    pub fn reset_conversation(&mut self) {
        self.log.discard();
        self.example = ExamplePanel::default();
        self.notice = None;
    }
}

// ============================================================================
// SessionSnapshot
// ============================================================================

/// Serializable view of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Latest session number; 0 before the first capture.
    pub session: u64,
    /// Current UI mode.
    pub mode: UiMode,
    /// An AI request is in flight.
    pub processing: bool,
    /// Speech input is active.
    pub listening: bool,
    /// An utterance is being spoken.
    pub speaking: bool,
    /// Conversation in insertion order.
    pub messages: Vec<Message>,
    /// Worked-example side panel.
    pub example: ExamplePanel,
    /// User-visible error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Display URL of the captured frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,
}

impl SessionSnapshot {
    /// Builds a snapshot from the state and the session's transient data.
    #[must_use]
    pub fn from_state(state: &SessionState, session: u64, image_data_url: Option<String>) -> Self {
        Self {
            session,
            mode: state.mode,
            processing: state.processing,
            listening: state.listening,
            speaking: state.speaking,
            messages: state.log.messages().to_vec(),
            example: state.example.clone(),
            notice: state.notice.clone(),
            image_data_url,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
