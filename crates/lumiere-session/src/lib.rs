//! Lumiere Session
//!
//! Orchestrates a Socratic math tutoring session: camera capture, Gemini
//! analysis, voice dialogue, the HTTP API and WebSocket events.

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod gemini;
pub mod orchestrator;
pub mod session_state;
pub mod speech;
pub mod tutor;
pub mod websocket;

pub use api::{
    create_router, AppState, BrowserOrchestrator, CaptureRequest, ErrorResponse, TurnResponse,
    UtteranceRequest,
};
pub use capture::{
    CameraConstraints, CameraLease, CapturedImage, Frame, ImageCapture, RemoteCamera,
    StillImageCamera,
};
pub use config::{CameraConfig, Config, FacingMode, SpeechConfig};
pub use error::{AiErrorKind, LumiereError, Result};
pub use gemini::{GeminiChat, GeminiClient};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use session_state::{
    ExamplePanel, Message, MessageLog, Role, SessionSnapshot, SessionState, UiMode,
};
pub use speech::{
    BrowserVoice, Recognition, RecognitionOptions, SpeechErrorKind, SpeechInput, SpeechOutput,
    SpeechSignal, SpeechSignalKind, Speaker, Utterance, Voice,
};
pub use tutor::TutorClient;
pub use websocket::{EventBroadcaster, SessionEvent};
