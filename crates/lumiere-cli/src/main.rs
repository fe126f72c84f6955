//! Lumiere CLI
//!
//! Main entry point for the Lumiere math tutor: either serve the session API
//! to a browser client or run a tutoring session in the terminal.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use lumiere_session::{
    create_router, AppState, Config, EventBroadcaster, GeminiClient, Orchestrator, Recognition,
    RecognitionOptions, SpeechErrorKind, SpeechInput, SpeechOutput, StillImageCamera, TurnOutcome,
    Utterance, Voice,
};
use lumiere_view::{ChatView, JsonTranscript, MarkdownTranscript, ReasoningTicker, TICK_INTERVAL};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Lumiere - Socratic Math Tutor
///
/// Looks at handwritten math work and guides the learner to their own error
/// with short questions, never the answer.
#[derive(Parser, Debug)]
#[command(name = "lumiere")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Gemini model to use, overriding the config file
    #[arg(short, long, global = true, value_name = "MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the session API and event stream to a browser client
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Path to configuration file (default: lumiere.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,
    },

    /// Run a tutoring session in the terminal on an image of your work
    Tutor {
        /// Photo or scan of the handwritten work
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Path to configuration file (default: lumiere.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Write the conversation here on exit (.json for JSON, else Markdown)
        #[arg(short, long, value_name = "FILE")]
        transcript: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Command::Serve { port, config } => {
            run_server(port, config.as_deref(), args.model.as_deref()).await
        }
        Command::Tutor {
            image,
            config,
            transcript,
        } => {
            run_tutor(
                &image,
                config.as_deref(),
                args.model.as_deref(),
                transcript.as_deref(),
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// serve
// ============================================================================

async fn run_server(
    port: u16,
    config_path: Option<&str>,
    model: Option<&str>,
) -> anyhow::Result<()> {
    let config = load_config(config_path, model)?;
    print_config(&config);

    let tutor = GeminiClient::from_config(&config).map_err(|e| {
        anyhow::anyhow!(
            "{e}\n\nSuggestion: export {} with your API key",
            config.api_key_env
        )
    })?;

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let router = create_router(AppState::new(config, tutor));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("Lumiere API running on http://{addr}");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down");
            }
        })
        .await?;

    Ok(())
}

// ============================================================================
// tutor
// ============================================================================

/// Orchestrator used by the terminal session.
type TerminalOrchestrator = Orchestrator<GeminiClient, StillImageCamera, TerminalVoice>;

async fn run_tutor(
    image: &Path,
    config_path: Option<&str>,
    model: Option<&str>,
    transcript: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config_path, model)?;
    let tutor = GeminiClient::from_config(&config).map_err(|e| {
        anyhow::anyhow!(
            "{e}\n\nSuggestion: export {} with your API key",
            config.api_key_env
        )
    })?;

    let camera = StillImageCamera::new(image, config.camera.jpeg_quality);
    let broadcaster = EventBroadcaster::new(config.event_buffer);
    let keyword = config.example_keyword.clone();
    let mut orchestrator =
        Orchestrator::new(config, tutor, camera, TerminalVoice::default(), broadcaster);

    orchestrator.start().await.map_err(|e| {
        anyhow::anyhow!("{e}\n\nSuggestion: Check that {} exists", image.display())
    })?;

    println!("Analyzing {}...", image.display());
    analyze_with_ticker(&mut orchestrator).await?;

    let mut screen = Screen::default();
    screen.refresh(&orchestrator);

    println!();
    println!("Answer out loud by typing. Say \"{keyword}\" for a worked example.");
    println!("Commands: /example, /close, /exit");

    let mut input = TerminalInput::new();
    loop {
        TerminalInput::prompt().await;
        let outcome = orchestrator.listen(&mut input).await;

        match input.take_command() {
            Some(TerminalCommand::Exit) => break,
            Some(TerminalCommand::Example) => {
                if orchestrator.request_example().await == TurnOutcome::NoSession {
                    println!("No active session.");
                }
            }
            Some(TerminalCommand::Close) => orchestrator.close_example(),
            Some(TerminalCommand::Unknown(name)) => println!("Unknown command: /{name}"),
            None => {
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "Turn failed");
                }
            }
        }

        screen.refresh(&orchestrator);
    }

    if let Some(path) = transcript {
        write_transcript(&orchestrator, path)?;
        println!("Transcript written to {}", path.display());
    }

    orchestrator.exit();
    Ok(())
}

/// Runs capture while printing the reasoning log.
async fn analyze_with_ticker(orchestrator: &mut TerminalOrchestrator) -> anyhow::Result<()> {
    let mut ticker = ReasoningTicker::new();
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    let capture = orchestrator.capture();
    tokio::pin!(capture);

    let result = loop {
        tokio::select! {
            result = &mut capture => break result,
            _ = interval.tick() => eprintln!("  > {}", ticker.tick()),
        }
    };

    result.map_err(|e| anyhow::anyhow!("{e}"))
}

fn write_transcript(orchestrator: &TerminalOrchestrator, path: &Path) -> anyhow::Result<()> {
    let snapshot = orchestrator.snapshot();
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        JsonTranscript::new(&snapshot).write_to_file(path, true)?;
    } else {
        std::fs::write(path, MarkdownTranscript::new(&snapshot).generate())?;
    }
    Ok(())
}

// ============================================================================
// Terminal adapters
// ============================================================================

/// Prints whatever changed since the last refresh.
#[derive(Debug, Default)]
struct Screen {
    shown: usize,
    notice: Option<String>,
    example_open: bool,
}

impl Screen {
    fn refresh(&mut self, orchestrator: &TerminalOrchestrator) {
        let view = ChatView::from_snapshot(&orchestrator.snapshot());

        for bubble in view.bubbles.iter().skip(self.shown) {
            if let Some(label) = bubble.label {
                println!("{label}: {}", bubble.text);
            }
        }
        self.shown = view.bubbles.len();

        if view.notice != self.notice {
            if let Some(notice) = &view.notice {
                println!("! {notice}");
            }
            self.notice.clone_from(&view.notice);
        }

        match (&view.example, self.example_open) {
            (Some(example), false) => {
                println!();
                println!("--- Worked example ---");
                for line in &example.lines {
                    println!("{line}");
                }
                println!("----------------------");
                self.example_open = true;
            }
            (None, true) => self.example_open = false,
            _ => {}
        }
    }
}

/// A slash command typed instead of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TerminalCommand {
    Example,
    Close,
    Exit,
    Unknown(String),
}

impl TerminalCommand {
    fn parse(line: &str) -> Option<Self> {
        let name = line.trim().strip_prefix('/')?;
        Some(match name.to_ascii_lowercase().as_str() {
            "example" => Self::Example,
            "close" => Self::Close,
            "exit" | "quit" => Self::Exit,
            _ => Self::Unknown(name.to_string()),
        })
    }
}

/// Speech input read line by line from stdin.
///
/// Commands are set aside and reported as an aborted recognition; end of
/// input is an exit command.
struct TerminalInput {
    lines: Lines<BufReader<Stdin>>,
    command: Option<TerminalCommand>,
}

impl TerminalInput {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            command: None,
        }
    }

    async fn prompt() {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(b"> ").await;
        let _ = stdout.flush().await;
    }

    fn take_command(&mut self) -> Option<TerminalCommand> {
        self.command.take()
    }
}

#[async_trait]
impl SpeechInput for TerminalInput {
    async fn listen(&mut self, _options: &RecognitionOptions) -> Recognition {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(command) = TerminalCommand::parse(&line) {
                    self.command = Some(command);
                    return Recognition::error(SpeechErrorKind::Aborted);
                }
                if line.trim().is_empty() {
                    return Recognition::error(SpeechErrorKind::NoSpeech);
                }
                Recognition::transcript(line)
            }
            Ok(None) => {
                self.command = Some(TerminalCommand::Exit);
                Recognition::error(SpeechErrorKind::Aborted)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                self.command = Some(TerminalCommand::Exit);
                Recognition::error(SpeechErrorKind::Other)
            }
        }
    }
}

/// Speech output for a terminal without audio. Replies are already printed,
/// so utterances are only logged.
#[derive(Debug, Default)]
struct TerminalVoice {
    active: Option<u64>,
}

impl SpeechOutput for TerminalVoice {
    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn cancel(&mut self) {
        if let Some(id) = self.active.take() {
            tracing::debug!(utterance = id, "Speech cancelled");
        }
    }

    fn speak(&mut self, utterance: &Utterance) -> lumiere_session::Result<()> {
        tracing::debug!(utterance = utterance.id, text = %utterance.text, "Speaking");
        self.active = Some(utterance.id);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the specified path or default location, then
/// applies CLI overrides.
fn load_config(config_path: Option<&str>, model: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))?
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}"))?,
    };

    if let Some(model) = model {
        config.model = model.to_string();
    }

    // Re-validate after overrides
    config.validate()?;
    Ok(config)
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Model: {}", config.model);
    println!("  Temperature: {}", config.temperature);
    println!("  Request timeout: {}s", config.request_timeout_secs);
    println!("  Voice: {} ({})", config.speech.lang, config.speech.preferred_voices.join(", "));
}
