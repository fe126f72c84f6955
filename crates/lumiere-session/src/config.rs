//! Configuration types for Lumiere tutoring sessions.
//!
//! This module provides all configuration structures used to control
//! a session: the Gemini model and credential, the example trigger keyword,
//! speech locale and voice preferences, and camera constraints.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LumiereError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "lumiere.json";

/// Default Gemini model.
fn default_model() -> String {
    "gemini-3-pro-preview".to_string()
}

/// Default Gemini REST base URL.
fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

/// Default environment variable holding the AI credential.
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

/// Default sampling temperature.
const fn default_temperature() -> f32 {
    0.7
}

/// Default per-request timeout in seconds.
const fn default_request_timeout() -> u64 {
    60
}

/// Default keyword that reroutes an utterance to example generation.
fn default_example_keyword() -> String {
    "example".to_string()
}

/// Default event buffer per WebSocket subscriber.
const fn default_event_buffer() -> usize {
    100
}

fn default_lang() -> String {
    "en-US".to_string()
}

fn default_preferred_voices() -> Vec<String> {
    vec![
        "Google UK English Male".to_string(),
        "Google US English".to_string(),
    ]
}

const fn default_rate() -> f32 {
    0.9
}

const fn default_pitch() -> f32 {
    1.0
}

const fn default_ideal_width() -> u32 {
    1920
}

const fn default_ideal_height() -> u32 {
    1080
}

const fn default_jpeg_quality() -> u8 {
    80
}

/// Main configuration for a Lumiere deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gemini model used for every session.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the `generateContent` REST endpoint (without the model).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature sent with every request.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout for a single AI request in seconds. Requests are never retried.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Case-insensitive substring that turns an utterance into an example request.
    #[serde(default = "default_example_keyword")]
    pub example_keyword: String,

    /// Number of events buffered per WebSocket subscriber.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Speech input/output settings.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Camera constraints and frame encoding.
    #[serde(default)]
    pub camera: CameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            example_keyword: default_example_keyword(),
            event_buffer: default_event_buffer(),
            speech: SpeechConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lumiere.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LumiereError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `lumiere.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `LumiereError::ConfigValidationError` if the configuration values
    /// are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LumiereError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LumiereError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LumiereError::config_validation(
                "model must not be empty",
                "Set model to a Gemini model name in your lumiere.json",
            ));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(LumiereError::config_validation(
                "apiKeyEnv must not be empty",
                "Set apiKeyEnv to the environment variable holding your API key",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LumiereError::config_validation(
                format!("temperature must be between 0 and 2 (got {})", self.temperature),
                "Set temperature to a value such as 0.7 in your lumiere.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(LumiereError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your lumiere.json",
            ));
        }

        if self.example_keyword.trim().is_empty() {
            return Err(LumiereError::config_validation(
                "exampleKeyword must not be empty",
                "Set exampleKeyword to a word such as \"example\" in your lumiere.json",
            ));
        }

        if self.event_buffer == 0 {
            return Err(LumiereError::config_validation(
                "eventBuffer must be greater than 0",
                "Set eventBuffer to at least 1 in your lumiere.json",
            ));
        }

        self.speech.validate()?;
        self.camera.validate()
    }

    /// Reads the AI credential from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::MissingCredential` if the variable is unset or blank.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(LumiereError::missing_credential(&self.api_key_env)),
        }
    }
}

/// Speech recognition and synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// BCP-47 locale for recognition and synthesis.
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Voice names in order of preference; substring match.
    #[serde(default = "default_preferred_voices")]
    pub preferred_voices: Vec<String>,

    /// Speaking rate.
    #[serde(default = "default_rate")]
    pub rate: f32,

    /// Speaking pitch.
    #[serde(default = "default_pitch")]
    pub pitch: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            preferred_voices: default_preferred_voices(),
            rate: default_rate(),
            pitch: default_pitch(),
        }
    }
}

impl SpeechConfig {
    fn validate(&self) -> Result<()> {
        if self.lang.trim().is_empty() {
            return Err(LumiereError::config_validation(
                "speech.lang must not be empty",
                "Set speech.lang to a locale such as \"en-US\" in your lumiere.json",
            ));
        }

        if !(0.1..=10.0).contains(&self.rate) {
            return Err(LumiereError::config_validation(
                format!("speech.rate must be between 0.1 and 10 (got {})", self.rate),
                "Set speech.rate to a value such as 0.9 in your lumiere.json",
            ));
        }

        if !(0.0..=2.0).contains(&self.pitch) {
            return Err(LumiereError::config_validation(
                format!("speech.pitch must be between 0 and 2 (got {})", self.pitch),
                "Set speech.pitch to a value such as 1.0 in your lumiere.json",
            ));
        }

        Ok(())
    }
}

/// Which camera the capture adapter should prefer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FacingMode {
    /// Back camera, pointed at the page (default).
    #[default]
    Environment,
    /// Front camera.
    User,
}

impl FacingMode {
    /// Parses a string into a `FacingMode`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "environment" => Some(Self::Environment),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    /// Returns the platform name of this facing mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::User => "user",
        }
    }
}

impl<'de> Deserialize<'de> for FacingMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid facing mode '{s}': expected one of 'environment', 'user'"
            ))
        })
    }
}

impl Serialize for FacingMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Camera constraints and still-frame encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    /// Preferred camera.
    #[serde(default)]
    pub facing: FacingMode,

    /// Ideal stream width in pixels.
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,

    /// Ideal stream height in pixels.
    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,

    /// JPEG quality (1-100) used when a frame must be re-encoded.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: FacingMode::default(),
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl CameraConfig {
    fn validate(&self) -> Result<()> {
        if self.ideal_width == 0 || self.ideal_height == 0 {
            return Err(LumiereError::config_validation(
                "camera.idealWidth and camera.idealHeight must be greater than 0",
                "Use a resolution such as 1920x1080 in your lumiere.json",
            ));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(LumiereError::config_validation(
                format!(
                    "camera.jpegQuality must be between 1 and 100 (got {})",
                    self.jpeg_quality
                ),
                "Set camera.jpegQuality to a value such as 80 in your lumiere.json",
            ));
        }

        Ok(())
    }
}
