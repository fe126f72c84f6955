//! Shared fixtures: a scripted Gemini endpoint and a running Lumiere server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use lumiere_session::{create_router, AppState, Config, GeminiClient};
use serde_json::{json, Value};

/// API key the fake endpoint accepts.
pub const TEST_KEY: &str = "test-key";

/// A tiny JPEG (SOI + EOI markers) as base64.
pub const TINY_JPEG_BASE64: &str = "/9j/2Q==";

/// One scripted answer of the fake endpoint.
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Failure(u16, String),
}

/// A scripted stand-in for the Gemini `generateContent` endpoint.
///
/// Replies are served in the order they were queued; every request body is
/// recorded.
#[derive(Debug, Clone, Default)]
pub struct FakeGemini {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeGemini {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful text reply.
    pub fn reply(&self, text: &str) -> &Self {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Reply::Text(text.to_string()));
        self
    }

    /// Queues an error response.
    pub fn fail(&self, status: u16, message: &str) -> &Self {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Reply::Failure(status, message.to_string()));
        self
    }

    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Starts the endpoint and returns its models base URL.
    pub async fn spawn(&self) -> String {
        let router = Router::new()
            .route("/v1beta/models/:call", post(generate_content))
            .with_state(self.clone());
        let addr = serve(router).await;
        format!("http://{addr}/v1beta/models")
    }
}

async fn generate_content(
    State(fake): State<FakeGemini>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !call.ends_with(":generateContent") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let key = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok());
    if key != Some(TEST_KEY) {
        return error_response(403, "API key not valid");
    }

    fake.requests.lock().expect("requests lock").push(body);
    let next = fake.replies.lock().expect("replies lock").pop_front();

    match next {
        Some(Reply::Text(text)) => Json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        }))
        .into_response(),
        Some(Reply::Failure(status, message)) => error_response(status, &message),
        None => error_response(500, "no scripted reply"),
    }
}

fn error_response(status: u16, message: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let status_text = match status {
        403 => "PERMISSION_DENIED",
        429 => "RESOURCE_EXHAUSTED",
        _ => "INTERNAL",
    };
    (
        code,
        Json(json!({
            "error": { "code": status, "message": message, "status": status_text }
        })),
    )
        .into_response()
}

/// Serves `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    addr
}

/// Config pointing the Gemini client at `base_url`.
pub fn test_config(base_url: &str) -> Config {
    Config {
        api_base_url: base_url.to_string(),
        request_timeout_secs: 5,
        ..Config::default()
    }
}

/// A running Lumiere server backed by a fake Gemini endpoint.
pub struct TestApp {
    pub gemini: FakeGemini,
    pub state: AppState,
    pub base_url: String,
    pub ws_url: String,
    pub http: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(gemini: FakeGemini) -> Self {
        let gemini_url = gemini.spawn().await;
        Self::with_gemini_url(gemini, &gemini_url, TEST_KEY).await
    }

    /// Starts a server whose Gemini client uses `gemini_url` and `api_key`.
    pub async fn with_gemini_url(gemini: FakeGemini, gemini_url: &str, api_key: &str) -> Self {
        let config = test_config(gemini_url);
        let tutor = GeminiClient::new(&config, api_key).expect("Failed to build Gemini client");
        let state = AppState::new(config, tutor);

        let addr = serve(create_router(state.clone())).await;

        Self {
            gemini,
            state,
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws"),
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Uploads the tiny JPEG and runs the capture.
    pub async fn capture(&self) -> reqwest::Response {
        self.post("/api/session/capture", json!({ "image": TINY_JPEG_BASE64 }))
            .await
    }

    pub async fn say(&self, text: &str) -> reqwest::Response {
        self.post("/api/session/utterance", json!({ "text": text })).await
    }
}
