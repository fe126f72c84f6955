//! Error types for Lumiere tutoring sessions.
//!
//! This module defines the error hierarchy for configuration loading, the
//! capture and speech adapters, AI provider requests, and the session state
//! machine. Every adapter failure is recoverable: the orchestrator reverts to
//! a safe UI mode or appends a fixed apology message.

use std::path::PathBuf;

/// A specialized `Result` type for Lumiere session operations.
pub type Result<T> = std::result::Result<T, LumiereError>;

/// Errors that can occur while running a tutoring session.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help users resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum LumiereError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lumiere.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The AI credential environment variable is not set.
    #[error("AI credential not found in environment variable '{var}'\n\nSuggestion: Export {var} with your Gemini API key")]
    MissingCredential {
        /// Name of the environment variable that was read.
        var: String,
    },

    // ========================================================================
    // Capture Errors
    // ========================================================================
    /// The camera could not be opened or produced no frame.
    #[error("Camera unavailable: {message}\n\nSuggestion: Grant camera access or check the image path")]
    CameraUnavailable {
        /// Description of the camera failure.
        message: String,
    },

    /// A captured frame could not be decoded or re-encoded.
    #[error("Failed to encode captured frame: {message}")]
    ImageDecode {
        /// Description of the codec failure.
        message: String,
    },

    // ========================================================================
    // Speech Errors
    // ========================================================================
    /// The speech output adapter failed to start an utterance.
    #[error("Speech output failed: {message}")]
    SpeechOutputFailed {
        /// Description of the synthesis failure.
        message: String,
    },

    // ========================================================================
    // AI Provider Errors
    // ========================================================================
    /// The AI provider request failed.
    #[error("AI request failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    AiRequestFailed {
        /// The kind of failure.
        kind: AiErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// A chat message was empty or whitespace-only.
    #[error("Cannot send an empty message")]
    EmptyInput,

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// The operation needs a tutoring session but none is active.
    #[error("No active tutoring session\n\nSuggestion: Capture your work first")]
    NoActiveSession,

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of AI provider failures for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiErrorKind {
    /// Authentication failure (invalid or missing API key).
    Authentication,
    /// Rate limit or quota exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues or timeouts.
    Network,
    /// The provider answered but the response held no text.
    EmptyResponse,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for AiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::EmptyResponse => write!(f, "empty_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl AiErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your Gemini API key",
            Self::RateLimit => "Wait a moment before asking again",
            Self::Server => "Try again later; the AI service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::EmptyResponse => "Ask again, or rephrase the question",
            Self::Other => "Check the AI provider's status page",
        }
    }
}

impl LumiereError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `MissingCredential` error.
    #[must_use]
    pub fn missing_credential(var: impl Into<String>) -> Self {
        Self::MissingCredential { var: var.into() }
    }

    /// Creates a new `CameraUnavailable` error.
    #[must_use]
    pub fn camera_unavailable(message: impl Into<String>) -> Self {
        Self::CameraUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `ImageDecode` error.
    #[must_use]
    pub fn image_decode(message: impl Into<String>) -> Self {
        Self::ImageDecode {
            message: message.into(),
        }
    }

    /// Creates a new `SpeechOutputFailed` error.
    #[must_use]
    pub fn speech_output(message: impl Into<String>) -> Self {
        Self::SpeechOutputFailed {
            message: message.into(),
        }
    }

    /// Creates a new `AiRequestFailed` with automatic suggestion based on error kind.
    #[must_use]
    pub fn ai_request(kind: AiErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::AiRequestFailed {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates an `AiRequestFailed` for a response that carried no text.
    #[must_use]
    pub fn empty_response() -> Self {
        Self::ai_request(AiErrorKind::EmptyResponse, "No response from AI")
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if the user may reasonably re-trigger the action.
    ///
    /// Nothing is retried automatically; this only informs what the
    /// surfaces tell the user.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AiRequestFailed {
                kind: AiErrorKind::RateLimit
                    | AiErrorKind::Server
                    | AiErrorKind::Network
                    | AiErrorKind::EmptyResponse,
                ..
            } | Self::CameraUnavailable { .. }
        )
    }

    /// Returns `true` if the error comes from the caller's use of the
    /// state machine rather than from an adapter.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition { .. } | Self::NoActiveSession
        )
    }
}
