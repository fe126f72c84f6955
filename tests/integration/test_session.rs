//! End-to-end tests for tutoring sessions over the HTTP API.
//!
//! Each test runs a Lumiere server whose Gemini client talks to a scripted
//! local endpoint, so the full request path is exercised: upload, analysis,
//! dialogue, worked examples and leaving the session.

mod common;

use common::{FakeGemini, TestApp, TINY_JPEG_BASE64};
use lumiere_session::orchestrator::{ANALYSIS_FAILED, CHAT_FALLBACK, EXAMPLE_FAILED};
use lumiere_session::tutor::{ANALYZE_PROMPT, EXAMPLE_PROMPT};
use lumiere_session::{
    AiErrorKind, Config, ErrorResponse, GeminiClient, LumiereError, Role, SessionSnapshot,
    TurnOutcome, TurnResponse, UiMode,
};
use lumiere_view::{ChatView, MarkdownTranscript};
use reqwest::StatusCode;
use serde_json::json;

const FIRST_HINT: &str = "Look at the second line. What happens to the sign when you integrate?";

async fn snapshot_of(response: reqwest::Response) -> SessionSnapshot {
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.expect("Invalid snapshot body")
}

async fn turn_of(response: reqwest::Response) -> TurnResponse {
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.expect("Invalid turn body")
}

// ============================================================================
// Full session
// ============================================================================

/// Capture, two turns, an example and exit against the scripted endpoint.
#[tokio::test]
async fn test_full_session_flow() {
    let gemini = FakeGemini::new();
    gemini
        .reply(FIRST_HINT)
        .reply("Good. Now what is the derivative of u?")
        .reply("Step 1: Let u = x and dv = e^x dx.\nStep 2: Then v = e^x.");
    let app = TestApp::spawn(gemini).await;

    // Capture: the first hint becomes the first message.
    let snapshot = snapshot_of(app.capture().await).await;
    assert_eq!(snapshot.session, 1);
    assert_eq!(snapshot.mode, UiMode::Chatting);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::Model);
    assert_eq!(snapshot.messages[0].text, FIRST_HINT);
    assert_eq!(
        snapshot.image_data_url.as_deref(),
        Some(format!("data:image/jpeg;base64,{TINY_JPEG_BASE64}").as_str())
    );

    // A spoken answer continues the conversation.
    let turn = turn_of(app.say("it becomes positive").await).await;
    assert_eq!(turn.outcome, TurnOutcome::Replied);
    assert_eq!(turn.snapshot.messages.len(), 3);
    assert_eq!(turn.snapshot.messages[1].role, Role::User);
    assert_eq!(turn.snapshot.messages[1].text, "it becomes positive");

    // The keyword opens a worked example without touching the log.
    let turn = turn_of(app.say("Can I see an Example please").await).await;
    assert_eq!(turn.outcome, TurnOutcome::ExampleShown);
    assert_eq!(turn.snapshot.messages.len(), 3);
    assert!(turn.snapshot.example.open);
    assert!(turn
        .snapshot
        .example
        .content
        .as_deref()
        .is_some_and(|content| content.starts_with("Step 1")));

    let closed = snapshot_of(app.post("/api/session/example/close", json!({})).await).await;
    assert!(!closed.example.open);
    assert!(closed.example.content.is_some());

    // GET reflects the same state.
    let current = snapshot_of(app.http.get(app.url("/api/session")).send().await.unwrap()).await;
    assert_eq!(current.messages.len(), 3);
    assert_eq!(current.mode, UiMode::Chatting);

    // Leaving drops everything.
    let left = snapshot_of(app.http.delete(app.url("/api/session")).send().await.unwrap()).await;
    assert_eq!(left.mode, UiMode::Capturing);
    assert!(left.messages.is_empty());
    assert!(left.image_data_url.is_none());
    assert!(left.example.content.is_none());
}

/// Every request carries the system instruction and the growing history.
#[tokio::test]
async fn test_requests_carry_image_and_history() {
    let gemini = FakeGemini::new();
    gemini
        .reply(FIRST_HINT)
        .reply("What rule did you use there?")
        .reply("Step 1: ...");
    let app = TestApp::spawn(gemini).await;

    snapshot_of(app.capture().await).await;
    turn_of(app.say("the power rule").await).await;
    turn_of(app.post("/api/session/example", json!({})).await).await;

    let requests = app.gemini.requests();
    assert_eq!(requests.len(), 3);

    let first = &requests[0];
    assert!(first["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("NEVER solve the problem"));
    assert_eq!(first["contents"].as_array().unwrap().len(), 1);
    assert_eq!(first["contents"][0]["role"], "user");
    assert_eq!(
        first["contents"][0]["parts"][0]["inlineData"]["mimeType"],
        "image/jpeg"
    );
    assert_eq!(
        first["contents"][0]["parts"][0]["inlineData"]["data"],
        TINY_JPEG_BASE64
    );
    assert_eq!(first["contents"][0]["parts"][1]["text"], ANALYZE_PROMPT);

    let second = &requests[1];
    let contents = second["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[1]["parts"][0]["text"], FIRST_HINT);
    assert_eq!(contents[2]["parts"][0]["text"], "the power rule");

    let third = &requests[2];
    let contents = third["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 5);
    assert_eq!(contents[4]["parts"][0]["text"], EXAMPLE_PROMPT);
}

// ============================================================================
// Failures
// ============================================================================

/// A failed analysis returns to capturing with the notice and no session.
#[tokio::test]
async fn test_analysis_failure_returns_to_capturing() {
    let gemini = FakeGemini::new();
    gemini.fail(503, "The model is overloaded").reply(FIRST_HINT);
    let app = TestApp::spawn(gemini).await;

    let response = app.capture().await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorResponse = response.json().await.unwrap();
    assert!(body.error.contains("HTTP 503"));

    let current = snapshot_of(app.http.get(app.url("/api/session")).send().await.unwrap()).await;
    assert_eq!(current.mode, UiMode::Capturing);
    assert_eq!(current.notice.as_deref(), Some(ANALYSIS_FAILED));
    assert!(current.messages.is_empty());
    assert!(current.image_data_url.is_none());

    // Chatting is refused until a capture succeeds.
    assert_eq!(app.say("hello").await.status(), StatusCode::CONFLICT);

    // Retry clears the notice and the next capture works.
    let retried = snapshot_of(app.post("/api/session/retry", json!({})).await).await;
    assert!(retried.notice.is_none());
    let snapshot = snapshot_of(app.capture().await).await;
    assert_eq!(snapshot.mode, UiMode::Chatting);
    assert_eq!(snapshot.session, 2);
}

/// An unreachable model is reported without the API key in the body.
#[tokio::test]
async fn test_unreachable_model_error_hides_api_key() {
    let app = TestApp::with_gemini_url(
        FakeGemini::new(),
        "http://127.0.0.1:1/v1beta/models",
        "SECRET-KEY-123",
    )
    .await;

    let response = app.capture().await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = response.text().await.unwrap();
    assert!(body.contains("network"));
    assert!(!body.contains("SECRET-KEY-123"), "key leaked: {body}");
}

/// A failed chat turn appends the fallback and leaves the history unchanged.
#[tokio::test]
async fn test_chat_failure_appends_fallback() {
    let gemini = FakeGemini::new();
    gemini
        .reply(FIRST_HINT)
        .fail(429, "Quota exceeded")
        .reply("Which term did you differentiate first?");
    let app = TestApp::spawn(gemini).await;

    snapshot_of(app.capture().await).await;

    let turn = turn_of(app.say("is it the chain rule").await).await;
    assert_eq!(turn.outcome, TurnOutcome::Fallback);
    let last = turn.snapshot.messages.last().unwrap();
    assert_eq!(last.role, Role::Model);
    assert_eq!(last.text, CHAT_FALLBACK);

    let turn = turn_of(app.say("is it the chain rule").await).await;
    assert_eq!(turn.outcome, TurnOutcome::Replied);

    // The failed exchange never entered the model history.
    let requests = app.gemini.requests();
    assert_eq!(requests[2]["contents"].as_array().unwrap().len(), 3);
}

/// A failed example is apologised for in the log.
#[tokio::test]
async fn test_example_failure_is_reported_in_log() {
    let gemini = FakeGemini::new();
    gemini.reply(FIRST_HINT).fail(500, "internal");
    let app = TestApp::spawn(gemini).await;

    snapshot_of(app.capture().await).await;

    let turn = turn_of(app.post("/api/session/example", json!({})).await).await;
    assert_eq!(turn.outcome, TurnOutcome::ExampleFailed);
    assert!(!turn.snapshot.example.open);
    assert_eq!(turn.snapshot.messages.last().unwrap().text, EXAMPLE_FAILED);
}

/// Bad uploads and blank utterances are rejected or ignored without calling the model.
#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let gemini = FakeGemini::new();
    gemini.reply(FIRST_HINT);
    let app = TestApp::spawn(gemini).await;

    let response = app
        .post("/api/session/capture", json!({ "image": "data:image/png;base64,AAAA" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post("/api/session/capture", json!({ "image": "not base64!" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.gemini.requests().is_empty());

    snapshot_of(app.capture().await).await;
    let turn = turn_of(app.say("   ").await).await;
    assert_eq!(turn.outcome, TurnOutcome::Ignored);
    assert_eq!(turn.snapshot.messages.len(), 1);
    assert_eq!(app.gemini.requests().len(), 1);
}

/// Recognition errors set notices instead of failing the request.
#[tokio::test]
async fn test_recognition_results() {
    let gemini = FakeGemini::new();
    gemini.reply(FIRST_HINT).reply("Good. What comes next?");
    let app = TestApp::spawn(gemini).await;

    snapshot_of(app.capture().await).await;

    let turn = turn_of(
        app.post(
            "/api/session/recognition",
            json!({ "type": "error", "kind": "permission_denied" }),
        )
        .await,
    )
    .await;
    assert_eq!(turn.outcome, TurnOutcome::Ignored);
    assert!(turn.snapshot.notice.is_some());

    let turn = turn_of(
        app.post(
            "/api/session/recognition",
            json!({ "type": "transcript", "text": "I forgot the constant" }),
        )
        .await,
    )
    .await;
    assert_eq!(turn.outcome, TurnOutcome::Replied);
    assert_eq!(turn.snapshot.messages[1].text, "I forgot the constant");
}

// ============================================================================
// Client and presentation
// ============================================================================

/// HTTP failures from the endpoint are classified.
#[tokio::test]
async fn test_gemini_client_maps_http_errors() {
    use lumiere_session::{CapturedImage, Frame, TutorClient};

    let gemini = FakeGemini::new();
    let base_url = gemini.spawn().await;
    let image = CapturedImage::from_frame(&Frame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9])).unwrap();

    let wrong_key = GeminiClient::new(&common::test_config(&base_url), "wrong-key").unwrap();
    let err = wrong_key.start(&image).await.unwrap_err();
    assert!(matches!(
        err,
        LumiereError::AiRequestFailed {
            kind: AiErrorKind::Authentication,
            ..
        }
    ));

    gemini.fail(429, "Quota exceeded");
    let client = GeminiClient::new(&common::test_config(&base_url), common::TEST_KEY).unwrap();
    let err = client.start(&image).await.unwrap_err();
    assert!(matches!(
        err,
        LumiereError::AiRequestFailed {
            kind: AiErrorKind::RateLimit,
            ..
        }
    ));

    let unreachable = Config {
        api_base_url: "http://127.0.0.1:9/v1beta/models".to_string(),
        request_timeout_secs: 2,
        ..Config::default()
    };
    let offline = GeminiClient::new(&unreachable, common::TEST_KEY).unwrap();
    let err = offline.start(&image).await.unwrap_err();
    assert!(err.is_transient());
}

/// A finished session renders through the view layer.
#[tokio::test]
async fn test_session_renders_as_transcript() {
    let gemini = FakeGemini::new();
    gemini
        .reply("Check the $x^2$ term on line two.")
        .reply("Right. And after that?");
    let app = TestApp::spawn(gemini).await;

    snapshot_of(app.capture().await).await;
    let turn = turn_of(app.say("I dropped a factor of two").await).await;

    let view = ChatView::from_snapshot(&turn.snapshot);
    assert_eq!(view.badge, Some(lumiere_view::TARGET_LOCKED));
    assert_eq!(view.bubbles[0].text, "Check the x^2 term on line two.");
    assert_eq!(view.bubbles[0].label, Some(lumiere_view::MODEL_LABEL));

    let markdown = MarkdownTranscript::new(&turn.snapshot).generate();
    assert!(markdown.contains("# Lumiere Session 1"));
    assert!(markdown.contains("| Messages | 3 |"));
    assert!(markdown.contains("**You**"));
    assert!(markdown.contains("I dropped a factor of two"));
}
