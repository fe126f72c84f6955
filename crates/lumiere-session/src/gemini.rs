//! Gemini `generateContent` client.
//!
//! Calls the Gemini REST API directly. The conversational context is the chat
//! history, resent with every request; a turn is committed to the history only
//! once the model has answered.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::CapturedImage;
use crate::config::Config;
use crate::error::{AiErrorKind, LumiereError, Result};
use crate::tutor::{TutorClient, ANALYZE_PROMPT, SYSTEM_INSTRUCTION};

/// Header carrying the API key; the key never appears in a request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

const USER_ROLE: &str = "user";
const MODEL_ROLE: &str = "model";

/// Conversation history of one tutoring session.
#[derive(Debug, Clone, Default)]
pub struct GeminiChat {
    history: Vec<Content>,
}

impl GeminiChat {
    /// Number of committed turns (user and model).
    #[must_use]
    pub fn turns(&self) -> usize {
        self.history.len()
    }
}

/// Tutor client backed by the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiClient {
    /// Creates a client from the configuration and an API key.
    ///
    /// # Errors
    ///
    /// Returns `AiRequestFailed` if the HTTP client cannot be built.
    pub fn new(config: &Config, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                LumiereError::ai_request(AiErrorKind::Other, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Creates a client reading the key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if the variable is unset.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::new(config, api_key)
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, contents: Vec<Content>) -> GenerateContentRequest {
        GenerateContentRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_INSTRUCTION)],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }

    async fn generate(&self, contents: Vec<Content>) -> Result<String> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let body = self.build_request(contents);
        debug!(model = %self.model, turns = body.contents.len(), "Sending generateContent request");

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            let err = map_http_error(status, &body_text);
            warn!(status = status.as_u16(), "Gemini request failed");
            return Err(err);
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            LumiereError::ai_request(AiErrorKind::Other, format!("failed to parse Gemini response: {e}"))
        })?;

        extract_text(parsed)
    }

    async fn commit_turn(&self, chat: &mut GeminiChat, user: Content) -> Result<String> {
        let mut contents = chat.history.clone();
        contents.push(user.clone());

        let reply = self.generate(contents).await?;

        chat.history.push(user);
        chat.history.push(Content {
            role: Some(MODEL_ROLE.to_string()),
            parts: vec![Part::text(&reply)],
        });
        Ok(reply)
    }
}

#[async_trait]
impl TutorClient for GeminiClient {
    type Context = GeminiChat;

    async fn start(&self, image: &CapturedImage) -> Result<(GeminiChat, String)> {
        let user = Content {
            role: Some(USER_ROLE.to_string()),
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.base64.clone(),
                    },
                },
                Part::text(ANALYZE_PROMPT),
            ],
        };

        let mut chat = GeminiChat::default();
        let reply = self.commit_turn(&mut chat, user).await?;
        info!(model = %self.model, "Gemini session started");
        Ok((chat, reply))
    }

    async fn send(&self, chat: &mut GeminiChat, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(LumiereError::EmptyInput);
        }
        let user = Content {
            role: Some(USER_ROLE.to_string()),
            parts: vec![Part::text(text)],
        };
        self.commit_turn(chat, user).await
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Concatenates the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String> {
    let text: String = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LumiereError::empty_response());
    }
    Ok(text)
}

fn map_transport_error(err: reqwest::Error) -> LumiereError {
    let kind = if err.is_connect() || err.is_timeout() {
        AiErrorKind::Network
    } else {
        AiErrorKind::Other
    };
    let err = err.without_url();
    LumiereError::ai_request(kind, format!("Gemini API request failed: {err}"))
}

fn map_http_error(status: StatusCode, body: &str) -> LumiereError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.to_string());

    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AiErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => AiErrorKind::RateLimit,
        s if s.is_server_error() => AiErrorKind::Server,
        _ => AiErrorKind::Other,
    };

    LumiereError::ai_request(kind, format!("HTTP {}: {message}", status.as_u16()))
}
