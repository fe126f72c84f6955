//! Lumiere View
//!
//! Presentation helpers for tutoring sessions. This crate turns a
//! [`SessionSnapshot`] into what a screen or a transcript shows:
//!
//! - [`ChatView`]: header, chat bubbles, microphone state and example panel
//! - [`ReasoningTicker`]: the "reasoning engine" log shown while analyzing
//! - [`MarkdownTranscript`]: a human-readable record of a session
//! - [`JsonTranscript`]: a machine-readable record of a session
//!
//! # Example
//!
//! ```rust
//! use lumiere_session::{SessionSnapshot, SessionState};
//! use lumiere_view::{ChatView, MicState};
//!
//! let snapshot = SessionSnapshot::from_state(&SessionState::new(), 0, None);
//! let view = ChatView::from_snapshot(&snapshot);
//!
//! assert_eq!(view.mode_label, "capturing");
//! assert_eq!(view.mic, MicState::Idle);
//! assert!(view.bubbles.is_empty());
//! ```

pub mod json;
pub mod markdown;

pub use json::JsonTranscript;
pub use markdown::MarkdownTranscript;

use std::time::Duration;

use lumiere_session::{Message, Role, SessionSnapshot, UiMode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while rendering a session.
#[derive(Debug, Error)]
pub enum ViewError {
    /// Failed to serialize the snapshot to JSON.
    #[error("failed to serialize transcript: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write transcript files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for view operations.
pub type Result<T> = std::result::Result<T, ViewError>;

// ============================================================================
// Display text
// ============================================================================

static DISPLAY_MARKUP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\$+|\\").ok());

/// Label shown above model bubbles.
pub const MODEL_LABEL: &str = "Lumiere AI";

/// Badge shown while a captured image is on screen.
pub const TARGET_LOCKED: &str = "TARGET_LOCKED";

/// Removes dollar-sign runs and backslashes left over from LaTeX.
///
/// # Examples
///
/// ```
/// use lumiere_view::clean_display_text;
///
/// assert_eq!(clean_display_text(r"Try $$\frac{1}{2}$$ here"), "Try frac{1}{2} here");
/// ```
#[must_use]
pub fn clean_display_text(text: &str) -> String {
    let Some(re) = DISPLAY_MARKUP.as_ref() else {
        return text.replace(['$', '\\'], "");
    };
    re.replace_all(text, "").into_owned()
}

// ============================================================================
// ChatView
// ============================================================================

/// Horizontal placement of a chat bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Model messages.
    Left,
    /// User messages.
    Right,
}

/// One rendered chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bubble {
    /// Id of the underlying message.
    pub id: u64,
    /// Author label; only model bubbles carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    /// Cleaned message text.
    pub text: String,
    /// Where the bubble sits.
    pub alignment: Alignment,
}

impl Bubble {
    /// Renders a message as a bubble.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        let (label, alignment) = match message.role {
            Role::User => (None, Alignment::Right),
            Role::Model => (Some(MODEL_LABEL), Alignment::Left),
        };
        Self {
            id: message.id,
            label,
            text: clean_display_text(&message.text),
            alignment,
        }
    }
}

/// What the microphone button shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicState {
    /// Ready to listen.
    Idle,
    /// Speech input is active.
    Listening,
    /// The tutor is talking.
    Speaking,
    /// An AI request is in flight; the button is disabled.
    Busy,
}

impl MicState {
    /// Derives the button state from the activity flags.
    ///
    /// Listening wins over speaking, and both win over processing.
    #[must_use]
    pub const fn from_flags(processing: bool, listening: bool, speaking: bool) -> Self {
        if listening {
            Self::Listening
        } else if speaking {
            Self::Speaking
        } else if processing {
            Self::Busy
        } else {
            Self::Idle
        }
    }

    /// Returns `true` if pressing the button would start listening.
    #[must_use]
    pub const fn accepts_input(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for MicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// The worked-example side panel as displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExampleView {
    /// Cleaned example lines, in order.
    pub lines: Vec<String>,
}

/// Everything a chat screen needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatView {
    /// Mode shown in the header.
    pub mode_label: String,
    /// Badge shown over the captured image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<&'static str>,
    /// Conversation bubbles in order.
    pub bubbles: Vec<Bubble>,
    /// Microphone button state.
    pub mic: MicState,
    /// Open example panel, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<ExampleView>,
    /// User-visible error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl ChatView {
    /// Builds the view for `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let badge = snapshot
            .image_data_url
            .as_ref()
            .filter(|_| snapshot.mode != UiMode::Capturing)
            .map(|_| TARGET_LOCKED);

        let example = snapshot
            .example
            .content
            .as_deref()
            .filter(|_| snapshot.example.open)
            .map(|content| ExampleView {
                lines: clean_display_text(content)
                    .lines()
                    .map(str::trim_end)
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect(),
            });

        Self {
            mode_label: snapshot.mode.to_string(),
            badge,
            bubbles: snapshot.messages.iter().map(Bubble::from_message).collect(),
            mic: MicState::from_flags(snapshot.processing, snapshot.listening, snapshot.speaking),
            example,
            notice: snapshot.notice.clone(),
        }
    }
}

// ============================================================================
// ReasoningTicker
// ============================================================================

/// Lines cycled by the reasoning log while a frame is analyzed.
pub const REASONING_LINES: [&str; 10] = [
    "Scanning handwriting vector...",
    "Extracting symbolic expressions...",
    "Identifying logic path...",
    "Detecting integration error...",
    "Consulting Socratic database...",
    "Formulating guidance...",
    "Optimizing neural weights...",
    "Synthesizing verbal response...",
    "Analyzing algebraic structure...",
    "Verifying step-by-step consistency...",
];

/// Time between two reasoning lines.
pub const TICK_INTERVAL: Duration = Duration::from_millis(600);

/// Number of lines kept on screen.
pub const VISIBLE_LINES: usize = 4;

/// Rolling "reasoning engine" log.
///
/// Each [`tick`](Self::tick) appends the next line of [`REASONING_LINES`],
/// wrapping around, and only the last [`VISIBLE_LINES`] are kept.
#[derive(Debug, Clone, Default)]
pub struct ReasoningTicker {
    ticks: usize,
    visible: Vec<&'static str>,
}

impl ReasoningTicker {
    /// Creates an empty ticker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            visible: Vec::new(),
        }
    }

    /// Appends the next line and returns it.
    pub fn tick(&mut self) -> &'static str {
        let line = REASONING_LINES[self.ticks % REASONING_LINES.len()];
        self.ticks += 1;
        self.visible.push(line);
        if self.visible.len() > VISIBLE_LINES {
            let excess = self.visible.len() - VISIBLE_LINES;
            self.visible.drain(..excess);
        }
        line
    }

    /// Lines currently on screen, oldest first.
    #[must_use]
    pub fn visible(&self) -> &[&'static str] {
        &self.visible
    }

    /// Number of ticks so far.
    #[must_use]
    pub const fn ticks(&self) -> usize {
        self.ticks
    }

    /// Clears the log.
    pub fn reset(&mut self) {
        self.ticks = 0;
        self.visible.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
