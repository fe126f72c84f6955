//! The session orchestrator.
//!
//! [`Orchestrator`] owns the UI mode, the message log, the AI context and the
//! adapters. Operations take `&mut self`, so a single orchestrator never has
//! two AI requests in flight; every observable change is broadcast as a
//! [`SessionEvent`] and mirrored into the published snapshot. The snapshot is
//! published before the event goes out, so a client that subscribes at any
//! point sees either the event or a snapshot that already contains it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{CameraConstraints, CameraLease, CapturedImage, ImageCapture};
use crate::config::Config;
use crate::error::{LumiereError, Result};
use crate::session_state::{Role, SessionSnapshot, SessionState, UiMode};
use crate::speech::{
    Recognition, RecognitionOptions, SpeechErrorKind, SpeechInput, SpeechOutput, SpeechSignal,
    Speaker,
};
use crate::tutor::TutorClient;
use crate::websocket::{EventBroadcaster, SessionEvent};

/// Notice shown when starting a session fails.
pub const ANALYSIS_FAILED: &str = "Analysis failed. Please try again.";
/// Notice shown when the camera cannot be opened.
pub const CAMERA_REQUIRED: &str = "Camera access required for vision analysis.";
/// Model message appended when a chat turn fails.
pub const CHAT_FALLBACK: &str = "I'm having trouble connecting. Could you say that again?";
/// Spoken when a worked example opens.
pub const EXAMPLE_INTRO: &str = "Here is a similar example for you to study.";
/// Model message appended and spoken when example generation fails.
pub const EXAMPLE_FAILED: &str = "I couldn't generate an example right now.";
/// Notice shown when the platform has no speech recognition.
pub const SPEECH_UNSUPPORTED: &str = "Voice recognition not supported in this browser.";
/// Notice shown when microphone access is denied.
pub const MICROPHONE_BLOCKED: &str = "Microphone access blocked. Please allow permissions.";

/// What a chat operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Nothing happened (empty input, busy microphone, recognizer error).
    Ignored,
    /// A user and a model message were appended.
    Replied,
    /// The request failed and the fallback message was appended.
    Fallback,
    /// The worked-example panel opened.
    ExampleShown,
    /// Example generation failed and the apology was appended.
    ExampleFailed,
    /// There was no session to ask within.
    NoSession,
}

struct ActiveSession<Ctx> {
    number: u64,
    context: Ctx,
}

/// Drives one learner through capture, analysis and voice dialogue.
pub struct Orchestrator<T: TutorClient, C: ImageCapture, S: SpeechOutput> {
    config: Config,
    tutor: T,
    camera: CameraLease<C>,
    speaker: Speaker<S>,
    broadcaster: EventBroadcaster,
    state: SessionState,
    session: Option<ActiveSession<T::Context>>,
    image: Option<CapturedImage>,
    generation: u64,
}

impl<T, C, S> std::fmt::Debug for Orchestrator<T, C, S>
where
    T: TutorClient,
    C: ImageCapture,
    S: SpeechOutput,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mode", &self.state.mode)
            .field("generation", &self.generation)
            .field("messages", &self.state.log.len())
            .field("has_session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, C, S> Orchestrator<T, C, S>
where
    T: TutorClient,
    C: ImageCapture,
    S: SpeechOutput,
{
    /// Creates an orchestrator in `capturing` mode. The camera is not opened
    /// until [`Orchestrator::start`].
    pub fn new(
        config: Config,
        tutor: T,
        camera: C,
        speech: S,
        broadcaster: EventBroadcaster,
    ) -> Self {
        let constraints = CameraConstraints::from(&config.camera);
        let speaker = Speaker::new(speech, config.speech.clone());
        let orchestrator = Self {
            config,
            tutor,
            camera: CameraLease::new(camera, constraints),
            speaker,
            broadcaster,
            state: SessionState::new(),
            session: None,
            image: None,
            generation: 0,
        };
        orchestrator.publish();
        orchestrator
    }

    // ========================================================================
    // Capture and analysis
    // ========================================================================

    /// Opens the camera for `capturing` mode.
    ///
    /// On failure the camera notice is shown and the error returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.state.mode != UiMode::Capturing {
            return Err(LumiereError::invalid_transition(self.state.mode, UiMode::Capturing));
        }
        self.enter_capturing().await
    }

    /// Grabs a frame from the camera and analyzes it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` outside `capturing` or while
    /// processing. Capture and AI failures show the analysis notice, leave the
    /// session in `capturing` with no context, and are returned.
    pub async fn capture(&mut self) -> Result<()> {
        self.ensure_can_capture()?;

        if !self.camera.is_held() {
            if let Err(e) = self.camera.acquire().await {
                self.notify(CAMERA_REQUIRED);
                self.publish();
                return Err(e);
            }
        }

        let frame = match self.camera.grab_frame().await {
            Ok(frame) => frame,
            Err(e) => return Err(self.capture_failed(e)),
        };
        let image = match CapturedImage::from_frame(&frame) {
            Ok(image) => image,
            Err(e) => return Err(self.capture_failed(e)),
        };

        self.analyze(image).await
    }

    /// Starts a tutoring session from an already captured image.
    ///
    /// Any previous context and message log are discarded first.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::capture`].
    pub async fn analyze(&mut self, image: CapturedImage) -> Result<()> {
        self.ensure_can_capture()?;

        self.session = None;
        self.state.reset_conversation();
        self.cancel_speech();

        self.generation += 1;
        let number = self.generation;
        self.set_mode(UiMode::Analyzing)?;
        self.camera.release();
        self.image = Some(image);
        self.set_processing(true);
        self.publish();

        info!(session = number, "Analyzing captured work");
        let started = match self.image.as_ref() {
            Some(image) => self.tutor.start(image).await,
            None => Err(LumiereError::NoActiveSession),
        };

        match started {
            Ok((context, reply)) => {
                self.session = Some(ActiveSession { number, context });
                self.append(Role::Model, reply.clone());
                self.set_processing(false);
                self.set_mode(UiMode::Chatting)?;
                self.speak(&reply);
                self.publish();
                info!(session = number, "Tutoring session started");
                Ok(())
            }
            Err(e) => {
                warn!(session = number, error = %e, "Session start failed");
                self.image = None;
                self.set_processing(false);
                self.notify(ANALYSIS_FAILED);
                self.set_mode(UiMode::Capturing)?;
                if let Err(camera_err) = self.camera.acquire().await {
                    warn!(error = %camera_err, "Camera unavailable after failed analysis");
                    self.notify(CAMERA_REQUIRED);
                }
                self.publish();
                Err(e)
            }
        }
    }

    // ========================================================================
    // Dialogue
    // ========================================================================

    /// Activates speech input once and handles the result.
    ///
    /// Ignored while processing, listening or speaking.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveSession` outside `chatting`.
    pub async fn listen<I>(&mut self, input: &mut I) -> Result<TurnOutcome>
    where
        I: SpeechInput + ?Sized,
    {
        if self.state.mode != UiMode::Chatting || self.session.is_none() {
            return Err(LumiereError::NoActiveSession);
        }
        if self.state.processing || self.state.listening || self.state.speaking {
            debug!("Microphone busy, ignoring listen request");
            return Ok(TurnOutcome::Ignored);
        }

        let options = RecognitionOptions::from(&self.config.speech);
        self.set_listening(true);
        self.publish();
        let recognition = input.listen(&options).await;
        self.handle_recognition(recognition).await
    }

    /// Applies the result of one recognition activation.
    ///
    /// # Errors
    ///
    /// A transcript is submitted with [`Orchestrator::submit_utterance`] and
    /// its errors returned; recognizer errors never fail.
    pub async fn handle_recognition(&mut self, recognition: Recognition) -> Result<TurnOutcome> {
        self.set_listening(false);

        match recognition {
            Recognition::Transcript { text } => {
                debug!(chars = text.len(), "Transcript received");
                self.submit_utterance(&text).await
            }
            Recognition::Error { kind, message } => {
                match kind {
                    SpeechErrorKind::Unsupported => self.notify(SPEECH_UNSUPPORTED),
                    SpeechErrorKind::PermissionDenied => self.notify(MICROPHONE_BLOCKED),
                    SpeechErrorKind::NoSpeech | SpeechErrorKind::Aborted => {
                        debug!(?kind, "Recognition ended without a transcript");
                    }
                    SpeechErrorKind::Other => {
                        warn!(detail = ?message, "Speech recognition error");
                    }
                }
                self.publish();
                Ok(TurnOutcome::Ignored)
            }
        }
    }

    /// Submits a user utterance.
    ///
    /// Blank text is ignored. Text containing the example keyword is routed to
    /// [`Orchestrator::request_example`] without touching the log. Otherwise
    /// the user message is appended, a reply is requested and appended, and
    /// the reply is spoken; a failed request appends the fallback message.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveSession` when there is no session.
    pub async fn submit_utterance(&mut self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            self.publish();
            return Ok(TurnOutcome::Ignored);
        }
        if self.session.is_none() {
            self.publish();
            return Err(LumiereError::NoActiveSession);
        }

        if self.is_example_request(text) {
            info!("Utterance asks for an example");
            return Ok(self.request_example().await);
        }

        self.append(Role::User, text);
        self.set_processing(true);
        self.publish();

        let Some(active) = self.session.as_mut() else {
            return Err(LumiereError::NoActiveSession);
        };
        let session = active.number;
        let reply = self.tutor.send(&mut active.context, text).await;
        self.set_processing(false);

        let outcome = match reply {
            Ok(reply) => {
                self.append(Role::Model, reply.clone());
                self.speak(&reply);
                TurnOutcome::Replied
            }
            Err(e) => {
                warn!(session, error = %e, "Chat turn failed");
                self.append(Role::Model, CHAT_FALLBACK);
                TurnOutcome::Fallback
            }
        };
        self.publish();
        Ok(outcome)
    }

    /// Asks for a parallel worked example within the current session.
    ///
    /// Without a session this is a no-op.
    pub async fn request_example(&mut self) -> TurnOutcome {
        let Some(session) = self.session.as_ref().map(|active| active.number) else {
            debug!("No session, ignoring example request");
            return TurnOutcome::NoSession;
        };

        self.set_processing(true);
        self.publish();
        let Some(active) = self.session.as_mut() else {
            return TurnOutcome::NoSession;
        };
        let example = self.tutor.example(&mut active.context).await;
        self.set_processing(false);

        let outcome = match example {
            Ok(content) => {
                self.state.example.open = true;
                self.state.example.content = Some(content.clone());
                self.emit(SessionEvent::ExampleOpened { session, content });
                self.speak(EXAMPLE_INTRO);
                info!(session, "Worked example shown");
                TurnOutcome::ExampleShown
            }
            Err(e) => {
                warn!(session, error = %e, "Example generation failed");
                self.append(Role::Model, EXAMPLE_FAILED);
                self.speak(EXAMPLE_FAILED);
                TurnOutcome::ExampleFailed
            }
        };
        self.publish();
        outcome
    }

    /// Closes the worked-example panel.
    pub fn close_example(&mut self) {
        if self.state.example.open {
            self.state.example.open = false;
            self.emit(SessionEvent::ExampleClosed {
                session: self.generation,
            });
            self.publish();
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clears the notice and, in `capturing`, reopens the camera.
    pub async fn retry(&mut self) -> Result<()> {
        self.state.notice = None;
        let result = if self.state.mode == UiMode::Capturing {
            self.enter_capturing().await
        } else {
            Ok(())
        };
        self.publish();
        result
    }

    /// Leaves the session: speech is cancelled, the context, log, image,
    /// panel and notice are discarded, and the camera is released.
    pub fn exit(&mut self) {
        let ended = self.generation;
        self.session = None;
        self.image = None;
        self.state.reset_conversation();
        self.state.processing = false;
        self.state.listening = false;
        self.cancel_speech();
        if self.state.mode != UiMode::Capturing {
            self.state.mode = UiMode::Capturing;
            self.emit(SessionEvent::ModeChanged {
                session: ended,
                mode: UiMode::Capturing,
            });
        }
        self.camera.release();
        self.emit(SessionEvent::SessionEnded { session: ended });
        self.publish();
        info!(session = ended, "Session ended");
    }

    /// Applies a playback signal from the speech output.
    pub fn speech_signal(&mut self, signal: SpeechSignal) {
        if self.speaker.on_signal(signal) {
            self.state.speaking = self.speaker.is_speaking();
            self.emit(SessionEvent::activity(&self.state));
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the serializable view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from_state(
            &self.state,
            self.generation,
            self.image.as_ref().map(|image| image.data_url.clone()),
        )
    }

    /// Returns the session state.
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `true` while a tutoring context exists.
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the latest session number; 0 before the first capture.
    pub const fn session_number(&self) -> u64 {
        self.generation
    }

    /// Returns the image of the current session.
    pub const fn image(&self) -> Option<&CapturedImage> {
        self.image.as_ref()
    }

    /// Returns the camera adapter.
    pub const fn camera(&self) -> &C {
        self.camera.camera()
    }

    /// Returns the camera adapter mutably.
    pub fn camera_mut(&mut self) -> &mut C {
        self.camera.camera_mut()
    }

    /// Returns `true` while the camera is held.
    pub fn camera_held(&self) -> bool {
        self.camera.is_held()
    }

    /// Returns the speech output adapter.
    pub const fn speech_output(&self) -> &S {
        self.speaker.output()
    }

    /// Returns the speech output adapter mutably.
    pub fn speech_output_mut(&mut self) -> &mut S {
        self.speaker.output_mut()
    }

    /// Returns the event broadcaster.
    pub const fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_can_capture(&self) -> Result<()> {
        if self.state.mode != UiMode::Capturing || self.state.processing {
            return Err(LumiereError::invalid_transition(self.state.mode, UiMode::Analyzing));
        }
        Ok(())
    }

    fn is_example_request(&self, text: &str) -> bool {
        text.to_lowercase()
            .contains(&self.config.example_keyword.to_lowercase())
    }

    async fn enter_capturing(&mut self) -> Result<()> {
        match self.camera.acquire().await {
            Ok(()) => {
                self.publish();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Camera unavailable");
                self.notify(CAMERA_REQUIRED);
                self.publish();
                Err(e)
            }
        }
    }

    fn capture_failed(&mut self, err: LumiereError) -> LumiereError {
        warn!(error = %err, "Capture failed");
        self.notify(ANALYSIS_FAILED);
        self.publish();
        err
    }

    fn set_mode(&mut self, next: UiMode) -> Result<()> {
        let previous = self.state.mode;
        self.state.transition(next)?;
        info!(from = %previous, to = %next, "Mode changed");
        self.emit(SessionEvent::ModeChanged {
            session: self.generation,
            mode: next,
        });
        Ok(())
    }

    fn set_processing(&mut self, processing: bool) {
        if self.state.processing != processing {
            self.state.processing = processing;
            self.emit(SessionEvent::activity(&self.state));
        }
    }

    fn set_listening(&mut self, listening: bool) {
        if self.state.listening != listening {
            self.state.listening = listening;
            self.emit(SessionEvent::activity(&self.state));
        }
    }

    fn append(&mut self, role: Role, text: impl Into<String>) {
        let message = self.state.log.push(role, text).clone();
        self.emit(SessionEvent::MessageAppended {
            session: self.generation,
            message,
        });
    }

    fn notify(&mut self, message: &str) {
        self.state.notice = Some(message.to_string());
        self.emit(SessionEvent::notice(message));
    }

    /// Speaking always cancels first, so the flag drops before the adapter
    /// broadcasts anything.
    fn speak(&mut self, text: &str) {
        self.state.speaking = false;
        self.publish();
        if let Err(e) = self.speaker.speak(text) {
            warn!(error = %e, "Speech output failed");
        }
        self.state.speaking = self.speaker.is_speaking();
    }

    fn cancel_speech(&mut self) {
        self.state.speaking = false;
        self.publish();
        self.speaker.cancel();
    }

    fn emit(&self, event: SessionEvent) {
        self.publish();
        self.broadcaster.send(event);
    }

    fn publish(&self) {
        self.broadcaster.publish_snapshot(self.snapshot());
    }
}
