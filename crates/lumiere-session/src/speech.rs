//! Speech input and output adapters.
//!
//! Recognition is one-shot: each activation yields exactly one
//! [`Recognition`]. Output goes through a [`Speaker`], which cancels the
//! active utterance before starting a new one and ignores signals from
//! utterances that are no longer active.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::error::Result;
use crate::websocket::{EventBroadcaster, SessionEvent};

/// Dollar runs and emphasis marks; `None` only if the pattern fails to compile.
static SPEECH_MARKUP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\$+|[*_]").ok());

// ============================================================================
// Speech input
// ============================================================================

/// Why a recognition attempt produced no transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechErrorKind {
    /// The platform has no speech recognition.
    Unsupported,
    /// Microphone access was denied.
    PermissionDenied,
    /// Recognition ended without a transcript.
    NoSpeech,
    /// Recognition was aborted.
    Aborted,
    /// Any other recognizer failure.
    Other,
}

/// The single outcome of one recognition activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recognition {
    /// The recognizer heard something.
    Transcript {
        /// Recognized text.
        text: String,
    },
    /// The recognizer failed or heard nothing.
    Error {
        /// Failure category.
        kind: SpeechErrorKind,
        /// Platform detail, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Recognition {
    /// Creates a transcript result.
    #[must_use]
    pub fn transcript(text: impl Into<String>) -> Self {
        Self::Transcript { text: text.into() }
    }

    /// Creates an error result without detail.
    #[must_use]
    pub const fn error(kind: SpeechErrorKind) -> Self {
        Self::Error {
            kind,
            message: None,
        }
    }
}

/// Recognizer settings for one activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOptions {
    /// BCP-47 locale.
    pub lang: String,
    /// Report partial results. Always `false`.
    pub interim_results: bool,
    /// Maximum alternatives per result. Always 1.
    pub max_alternatives: u8,
}

impl From<&SpeechConfig> for RecognitionOptions {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            lang: config.lang.clone(),
            interim_results: false,
            max_alternatives: 1,
        }
    }
}

/// One-shot speech recognizer.
#[async_trait]
pub trait SpeechInput: Send {
    /// Listens once and reports exactly one result.
    async fn listen(&mut self, options: &RecognitionOptions) -> Recognition;
}

// ============================================================================
// Speech output
// ============================================================================

/// A synthesis voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Platform voice name.
    pub name: String,
    /// Voice locale.
    pub lang: String,
}

impl Voice {
    /// Creates a voice.
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// A request to vocalize text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Speaker-assigned id, echoed back in [`SpeechSignal`]s.
    pub id: u64,
    /// Text with display markup stripped.
    pub text: String,
    /// Chosen voice name, if any voice is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Locale.
    pub lang: String,
    /// Speaking rate.
    pub rate: f32,
    /// Speaking pitch.
    pub pitch: f32,
}

/// Lifecycle stage reported by the output adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSignalKind {
    /// Playback started.
    Started,
    /// Playback finished.
    Ended,
    /// Playback failed.
    Failed,
}

/// A start/end/error notification for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSignal {
    /// Id of the utterance the signal belongs to.
    pub utterance: u64,
    /// What happened.
    pub kind: SpeechSignalKind,
}

/// A text-to-speech engine.
///
/// Implementations report playback progress back through
/// [`Speaker::on_signal`].
pub trait SpeechOutput: Send {
    /// Lists the available voices.
    fn voices(&self) -> Vec<Voice>;

    /// Stops the active utterance, if any.
    fn cancel(&mut self);

    /// Starts speaking `utterance`.
    fn speak(&mut self, utterance: &Utterance) -> Result<()>;
}

/// Removes markup that should not be read aloud: `$` runs, `*` and `_`.
///
/// # Examples
///
/// ```
/// use lumiere_session::speech::strip_speech_markup;
///
/// assert_eq!(strip_speech_markup("**Look** at $x_1$"), "Look at x1");
/// ```
#[must_use]
pub fn strip_speech_markup(text: &str) -> String {
    let Some(re) = SPEECH_MARKUP.as_ref() else {
        return text.replace(['$', '*', '_'], "");
    };
    re.replace_all(text, "").into_owned()
}

/// Picks the first voice whose name contains a preferred name, trying
/// preferences in order, else the first voice.
#[must_use]
pub fn select_voice<'a>(voices: &'a [Voice], preferred: &[String]) -> Option<&'a Voice> {
    preferred
        .iter()
        .find_map(|wanted| voices.iter().find(|v| v.name.contains(wanted.as_str())))
        .or_else(|| voices.first())
}

/// Drives a [`SpeechOutput`] with at most one active utterance.
#[derive(Debug)]
pub struct Speaker<O: SpeechOutput> {
    output: O,
    config: SpeechConfig,
    next_id: u64,
    active: Option<u64>,
    speaking: bool,
}

impl<O: SpeechOutput> Speaker<O> {
    /// Creates a speaker over `output`.
    pub const fn new(output: O, config: SpeechConfig) -> Self {
        Self {
            output,
            config,
            next_id: 1,
            active: None,
            speaking: false,
        }
    }

    /// Cancels the active utterance, then speaks `text`.
    ///
    /// Returns the new utterance, or `None` when stripping left nothing to say.
    ///
    /// # Errors
    ///
    /// Returns `SpeechOutputFailed` if the adapter could not start playback.
    pub fn speak(&mut self, text: &str) -> Result<Option<Utterance>> {
        self.cancel();

        let spoken = strip_speech_markup(text);
        if spoken.trim().is_empty() {
            return Ok(None);
        }

        let voices = self.output.voices();
        let voice = select_voice(&voices, &self.config.preferred_voices).map(|v| v.name.clone());

        let utterance = Utterance {
            id: self.next_id,
            text: spoken,
            voice,
            lang: self.config.lang.clone(),
            rate: self.config.rate,
            pitch: self.config.pitch,
        };
        self.next_id += 1;

        self.output.speak(&utterance)?;
        self.active = Some(utterance.id);
        debug!(utterance = utterance.id, voice = ?utterance.voice, "Speaking");
        Ok(Some(utterance))
    }

    /// Stops the active utterance, if any.
    pub fn cancel(&mut self) {
        if self.active.take().is_some() {
            self.output.cancel();
        }
        self.speaking = false;
    }

    /// Applies a playback signal.
    ///
    /// Returns `true` if the signal changed the speaking flag. Signals for
    /// utterances other than the active one are ignored.
    pub fn on_signal(&mut self, signal: SpeechSignal) -> bool {
        if self.active != Some(signal.utterance) {
            debug!(utterance = signal.utterance, "Ignoring stale speech signal");
            return false;
        }

        let speaking = match signal.kind {
            SpeechSignalKind::Started => true,
            SpeechSignalKind::Ended => {
                self.active = None;
                false
            }
            SpeechSignalKind::Failed => {
                warn!(utterance = signal.utterance, "Speech playback failed");
                self.active = None;
                false
            }
        };

        let changed = speaking != self.speaking;
        self.speaking = speaking;
        changed
    }

    /// Returns `true` while an utterance is playing.
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Returns the id of the active utterance.
    pub const fn active(&self) -> Option<u64> {
        self.active
    }

    /// Returns the wrapped adapter.
    pub const fn output(&self) -> &O {
        &self.output
    }

    /// Returns the wrapped adapter mutably.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

// ============================================================================
// BrowserVoice
// ============================================================================

/// Speech output played by a remote client.
///
/// `speak` and `cancel` are broadcast as `speak` / `cancel_speech` events; the
/// client reports playback through the API as [`SpeechSignal`]s.
#[derive(Debug, Clone)]
pub struct BrowserVoice {
    broadcaster: EventBroadcaster,
    voices: Vec<Voice>,
}

impl BrowserVoice {
    /// Creates a browser voice with no known voices; the client picks one
    /// from `Utterance::voice` or its own default.
    #[must_use]
    pub const fn new(broadcaster: EventBroadcaster) -> Self {
        Self {
            broadcaster,
            voices: Vec::new(),
        }
    }

    /// Replaces the list of voices reported by the client.
    pub fn set_voices(&mut self, voices: Vec<Voice>) {
        self.voices = voices;
    }
}

impl SpeechOutput for BrowserVoice {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn cancel(&mut self) {
        self.broadcaster.send(SessionEvent::CancelSpeech);
    }

    fn speak(&mut self, utterance: &Utterance) -> Result<()> {
        self.broadcaster.send(SessionEvent::Speak {
            utterance: utterance.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::LumiereError;

    #[derive(Debug, Default)]
    struct RecordingOutput {
        voices: Vec<Voice>,
        spoken: Vec<Utterance>,
        cancels: usize,
        active: usize,
        max_active: usize,
        fail: bool,
    }

    impl SpeechOutput for RecordingOutput {
        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }

        fn cancel(&mut self) {
            self.cancels += 1;
            self.active = 0;
        }

        fn speak(&mut self, utterance: &Utterance) -> Result<()> {
            if self.fail {
                return Err(LumiereError::speech_output("engine busy"));
            }
            self.active += 1;
            self.max_active = self.max_active.max(self.active);
            self.spoken.push(utterance.clone());
            Ok(())
        }
    }

    fn voices() -> Vec<Voice> {
        vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Google US English", "en-US"),
            Voice::new("Google UK English Male", "en-GB"),
        ]
    }

    #[test]
    fn test_strip_speech_markup() {
        assert_eq!(strip_speech_markup("$$x^2$$ is *big*"), "x^2 is big");
        assert_eq!(strip_speech_markup("a_b"), "ab");
        assert_eq!(strip_speech_markup("plain"), "plain");
    }

    #[test]
    fn test_select_voice_prefers_in_order() {
        let voices = voices();
        let preferred = SpeechConfig::default().preferred_voices;

        let chosen = select_voice(&voices, &preferred).unwrap();
        assert_eq!(chosen.name, "Google UK English Male");

        let without_uk = &voices[..2];
        assert_eq!(
            select_voice(without_uk, &preferred).unwrap().name,
            "Google US English"
        );
    }

    #[test]
    fn test_select_voice_falls_back_to_first() {
        let voices = vec![Voice::new("Daniel", "en-GB")];
        let preferred = SpeechConfig::default().preferred_voices;
        assert_eq!(select_voice(&voices, &preferred).unwrap().name, "Daniel");
        assert!(select_voice(&[], &preferred).is_none());
    }

    #[test]
    fn test_speaker_builds_utterance_from_config() {
        let output = RecordingOutput {
            voices: voices(),
            ..Default::default()
        };
        let mut speaker = Speaker::new(output, SpeechConfig::default());

        let utterance = speaker.speak("Check the $sign$ on *line two*.").unwrap().unwrap();

        assert_eq!(utterance.text, "Check the sign on line two.");
        assert_eq!(utterance.voice.as_deref(), Some("Google UK English Male"));
        assert_eq!(utterance.lang, "en-US");
        assert!((utterance.rate - 0.9).abs() < f32::EPSILON);
        assert!((utterance.pitch - 1.0).abs() < f32::EPSILON);
        assert_eq!(speaker.active(), Some(utterance.id));
    }

    #[test]
    fn test_speaker_never_has_two_active_utterances() {
        let mut speaker = Speaker::new(RecordingOutput::default(), SpeechConfig::default());

        for text in ["one", "two", "three"] {
            speaker.speak(text).unwrap();
        }

        assert_eq!(speaker.output().max_active, 1);
        assert_eq!(speaker.output().spoken.len(), 3);
        assert_eq!(speaker.output().cancels, 2);
    }

    #[test]
    fn test_speaker_ignores_stale_signals() {
        let mut speaker = Speaker::new(RecordingOutput::default(), SpeechConfig::default());
        let first = speaker.speak("first").unwrap().unwrap();
        let second = speaker.speak("second").unwrap().unwrap();

        let stale = SpeechSignal {
            utterance: first.id,
            kind: SpeechSignalKind::Started,
        };
        assert!(!speaker.on_signal(stale));
        assert!(!speaker.is_speaking());

        assert!(speaker.on_signal(SpeechSignal {
            utterance: second.id,
            kind: SpeechSignalKind::Started,
        }));
        assert!(speaker.is_speaking());

        assert!(speaker.on_signal(SpeechSignal {
            utterance: second.id,
            kind: SpeechSignalKind::Ended,
        }));
        assert!(!speaker.is_speaking());
        assert_eq!(speaker.active(), None);
    }

    #[test]
    fn test_speaker_skips_empty_text() {
        let mut speaker = Speaker::new(RecordingOutput::default(), SpeechConfig::default());
        assert!(speaker.speak("$$ ** $$").unwrap().is_none());
        assert!(speaker.output().spoken.is_empty());
    }

    #[test]
    fn test_speaker_propagates_output_failure() {
        let output = RecordingOutput {
            fail: true,
            ..Default::default()
        };
        let mut speaker = Speaker::new(output, SpeechConfig::default());

        let err = speaker.speak("hello").unwrap_err();
        assert!(matches!(err, LumiereError::SpeechOutputFailed { .. }));
        assert_eq!(speaker.active(), None);
    }

    #[test]
    fn test_recognition_serialization() {
        let json = serde_json::to_string(&Recognition::transcript("why is that wrong")).unwrap();
        assert_eq!(json, r#"{"type":"transcript","text":"why is that wrong"}"#);

        let parsed: Recognition =
            serde_json::from_str(r#"{"type":"error","kind":"permission_denied"}"#).unwrap();
        assert_eq!(parsed, Recognition::error(SpeechErrorKind::PermissionDenied));
    }

    #[test]
    fn test_recognition_options_from_config() {
        let options = RecognitionOptions::from(&SpeechConfig::default());
        assert_eq!(options.lang, "en-US");
        assert!(!options.interim_results);
        assert_eq!(options.max_alternatives, 1);
    }

    #[tokio::test]
    async fn test_browser_voice_broadcasts_commands() {
        let broadcaster = EventBroadcaster::new(8);
        let mut events = broadcaster.subscribe();
        let mut speaker = Speaker::new(BrowserVoice::new(broadcaster), SpeechConfig::default());

        speaker.speak("first").unwrap();
        speaker.speak("second").unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Speak { utterance } if utterance.text == "first" && utterance.voice.is_none()
        ));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::CancelSpeech));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Speak { utterance } if utterance.text == "second"
        ));
    }
}
