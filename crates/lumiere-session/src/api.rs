//! HTTP API endpoints for a Lumiere tutoring session.
//!
//! A browser client owns the camera, microphone and speakers. It uploads
//! frames and recognition results here, and plays back the `speak` and
//! `camera_requested` commands it receives on `/ws`.
//!
//! # Endpoints
//!
//! - `GET /api/session` - Current session snapshot
//! - `POST /api/session/start` - Enter capturing mode and request the camera
//! - `POST /api/session/capture` - Upload a JPEG frame and analyze it
//! - `POST /api/session/recognition` - Deliver a speech recognition result
//! - `POST /api/session/utterance` - Submit typed or recognized text
//! - `POST /api/session/example` - Ask for a worked example
//! - `POST /api/session/example/close` - Close the example panel
//! - `POST /api/session/retry` - Clear the notice and reopen the camera
//! - `POST /api/session/speech` - Deliver a speech playback signal
//! - `PUT /api/session/voices` - Report the client's synthesis voices
//! - `DELETE /api/session` - Leave the session
//! - `GET /ws` - Event stream
//!
//! # Example
//!
//! ```no_run
//! use lumiere_session::{create_router, AppState, Config, GeminiClient};
//!
//! # async fn example() -> lumiere_session::Result<()> {
//! let config = Config::load()?;
//! let tutor = GeminiClient::from_config(&config)?;
//! let router = create_router(AppState::new(config, tutor));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::capture::{CapturedImage, RemoteCamera};
use crate::config::Config;
use crate::error::LumiereError;
use crate::gemini::GeminiClient;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::session_state::{SessionSnapshot, UiMode};
use crate::speech::{BrowserVoice, Recognition, SpeechSignal, Voice};
use crate::tutor::TutorClient;
use crate::websocket::{ws_handler, EventBroadcaster};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the capture endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// JPEG frame as bare base64 or a `data:image/jpeg;base64,` URL.
    pub image: String,
}

/// Request body for the utterance endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRequest {
    /// What the user said or typed.
    pub text: String,
}

/// Response body for chat operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    /// What the operation did.
    pub outcome: TurnOutcome,
    /// The session after the operation.
    pub snapshot: SessionSnapshot,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// The orchestrator as driven by a browser client.
pub type BrowserOrchestrator<T = GeminiClient> = Orchestrator<T, RemoteCamera, BrowserVoice>;

/// Shared application state for the HTTP server.
///
/// The orchestrator sits behind a fair mutex, so concurrent requests for the
/// session are applied one at a time in arrival order.
pub struct AppState<T: TutorClient = GeminiClient> {
    /// The session orchestrator.
    pub orchestrator: Arc<Mutex<BrowserOrchestrator<T>>>,
    /// Event broadcaster shared with the WebSocket endpoint.
    pub broadcaster: EventBroadcaster,
}

impl<T: TutorClient> AppState<T> {
    /// Creates a new `AppState` with a fresh session in `capturing` mode.
    #[must_use]
    pub fn new(config: Config, tutor: T) -> Self {
        let broadcaster = EventBroadcaster::new(config.event_buffer);
        let orchestrator = Orchestrator::new(
            config,
            tutor,
            RemoteCamera::new(broadcaster.clone()),
            BrowserVoice::new(broadcaster.clone()),
            broadcaster.clone(),
        );
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            broadcaster,
        }
    }
}

impl<T: TutorClient> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            broadcaster: self.broadcaster.clone(),
        }
    }
}

impl<T: TutorClient> std::fmt::Debug for AppState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("subscribers", &self.broadcaster.receiver_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The session is not in a state that accepts this request.
    InvalidState(String),
    /// The request payload was unusable.
    BadRequest(String),
    /// The AI provider failed.
    Upstream(String),
    /// Anything else.
    Internal(String),
}

impl From<LumiereError> for ApiError {
    fn from(err: LumiereError) -> Self {
        let message = err.to_string();
        match err {
            e if e.is_state_error() => Self::InvalidState(message),
            LumiereError::EmptyInput
            | LumiereError::ImageDecode { .. }
            | LumiereError::CameraUnavailable { .. } => Self::BadRequest(message),
            LumiereError::AiRequestFailed { .. } => Self::Upstream(message),
            _ => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidState(msg) => (StatusCode::CONFLICT, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// # Returns
///
/// An axum `Router` configured with:
/// - All session routes under `/api`
/// - The event stream at `/ws`
/// - CORS middleware for development
/// - Tracing middleware for request logging
pub fn create_router<T: TutorClient + 'static>(state: AppState<T>) -> Router {
    // Configure CORS for development (allow all origins)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/session",
            get(handle_snapshot::<T>).delete(handle_exit::<T>),
        )
        .route("/session/start", post(handle_start::<T>))
        .route("/session/capture", post(handle_capture::<T>))
        .route("/session/recognition", post(handle_recognition::<T>))
        .route("/session/utterance", post(handle_utterance::<T>))
        .route("/session/example", post(handle_example::<T>))
        .route("/session/example/close", post(handle_close_example::<T>))
        .route("/session/retry", post(handle_retry::<T>))
        .route("/session/speech", post(handle_speech_signal::<T>))
        .route("/session/voices", put(handle_voices::<T>));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler::<T>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

type SharedState<T> = State<Arc<AppState<T>>>;

/// Handler for `GET /api/session`.
///
/// Reads the published snapshot; never waits for an in-flight AI request.
async fn handle_snapshot<T: TutorClient>(State(state): SharedState<T>) -> Json<SessionSnapshot> {
    Json(state.broadcaster.snapshot())
}

/// Handler for `POST /api/session/start`.
async fn handle_start<T: TutorClient>(
    State(state): SharedState<T>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.start().await?;
    Ok(Json(orchestrator.snapshot()))
}

/// Handler for `POST /api/session/capture`.
///
/// Queues the uploaded frame on the remote camera and runs the capture.
async fn handle_capture<T: TutorClient>(
    State(state): SharedState<T>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut orchestrator = state.orchestrator.lock().await;
    let frame = CapturedImage::decode_upload(
        &request.image,
        orchestrator.config().camera.jpeg_quality,
    )?;
    info!(bytes = frame.bytes.len(), "Received frame upload");

    let current = orchestrator.state();
    if current.mode != UiMode::Capturing || current.processing {
        warn!(mode = %current.mode, "Cannot accept frame: not capturing");
        return Err(LumiereError::invalid_transition(current.mode, UiMode::Analyzing).into());
    }

    orchestrator.camera_mut().deliver(frame);
    orchestrator.capture().await?;

    info!(session = orchestrator.session_number(), "Session started from upload");
    Ok(Json(orchestrator.snapshot()))
}

/// Handler for `POST /api/session/recognition`.
async fn handle_recognition<T: TutorClient>(
    State(state): SharedState<T>,
    Json(recognition): Json<Recognition>,
) -> Result<Json<TurnResponse>, ApiError> {
    let mut orchestrator = state.orchestrator.lock().await;
    let outcome = orchestrator.handle_recognition(recognition).await?;
    Ok(Json(TurnResponse {
        outcome,
        snapshot: orchestrator.snapshot(),
    }))
}

/// Handler for `POST /api/session/utterance`.
async fn handle_utterance<T: TutorClient>(
    State(state): SharedState<T>,
    Json(request): Json<UtteranceRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let mut orchestrator = state.orchestrator.lock().await;
    let outcome = orchestrator.submit_utterance(&request.text).await?;
    info!(?outcome, "Utterance processed");
    Ok(Json(TurnResponse {
        outcome,
        snapshot: orchestrator.snapshot(),
    }))
}

/// Handler for `POST /api/session/example`.
async fn handle_example<T: TutorClient>(State(state): SharedState<T>) -> Json<TurnResponse> {
    let mut orchestrator = state.orchestrator.lock().await;
    let outcome = orchestrator.request_example().await;
    Json(TurnResponse {
        outcome,
        snapshot: orchestrator.snapshot(),
    })
}

/// Handler for `POST /api/session/example/close`.
async fn handle_close_example<T: TutorClient>(
    State(state): SharedState<T>,
) -> Json<SessionSnapshot> {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.close_example();
    Json(orchestrator.snapshot())
}

/// Handler for `POST /api/session/retry`.
async fn handle_retry<T: TutorClient>(
    State(state): SharedState<T>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.retry().await?;
    Ok(Json(orchestrator.snapshot()))
}

/// Handler for `POST /api/session/speech`.
async fn handle_speech_signal<T: TutorClient>(
    State(state): SharedState<T>,
    Json(signal): Json<SpeechSignal>,
) -> Json<SessionSnapshot> {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.speech_signal(signal);
    Json(orchestrator.snapshot())
}

/// Handler for `PUT /api/session/voices`.
async fn handle_voices<T: TutorClient>(
    State(state): SharedState<T>,
    Json(voices): Json<Vec<Voice>>,
) -> StatusCode {
    info!(count = voices.len(), "Client reported synthesis voices");
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.speech_output_mut().set_voices(voices);
    StatusCode::NO_CONTENT
}

/// Handler for `DELETE /api/session`.
async fn handle_exit<T: TutorClient>(State(state): SharedState<T>) -> Json<SessionSnapshot> {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.exit();
    Json(orchestrator.snapshot())
}

// ============================================================================
// Tests
// ============================================================================
