//! Markdown transcripts of tutoring sessions.
//!
//! [`MarkdownTranscript`] turns a [`SessionSnapshot`] into a document a
//! learner can keep: a summary table, the conversation, the last worked
//! example and any pending notice.
//!
//! # Example
//!
//! ```rust
//! use lumiere_session::{SessionSnapshot, SessionState};
//! use lumiere_view::MarkdownTranscript;
//!
//! let snapshot = SessionSnapshot::from_state(&SessionState::new(), 0, None);
//! let markdown = MarkdownTranscript::new(&snapshot).generate();
//! assert!(markdown.contains("# Lumiere Session 0"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use lumiere_session::{Message, Role, SessionSnapshot};

use crate::{clean_display_text, MODEL_LABEL};

/// Author label used for learner messages.
const USER_LABEL: &str = "You";

/// Renders a session snapshot as Markdown.
pub struct MarkdownTranscript<'a> {
    snapshot: &'a SessionSnapshot,
}

impl<'a> MarkdownTranscript<'a> {
    /// Creates a transcript for the given snapshot.
    #[must_use]
    pub const fn new(snapshot: &'a SessionSnapshot) -> Self {
        Self { snapshot }
    }

    /// Generates the complete document, footer included.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = self.generate_body();
        Self::write_footer(&mut output);
        output
    }

    /// Everything but the footer, which carries the generation time.
    fn generate_body(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_conversation(&mut output);
        self.write_example(&mut output);
        self.write_notice(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(output, "# Lumiere Session {}\n", self.snapshot.session);
    }

    fn write_summary(&self, output: &mut String) {
        let messages = &self.snapshot.messages;

        let _ = writeln!(output, "| Field | Value |");
        let _ = writeln!(output, "|-------|-------|");
        let _ = writeln!(output, "| Mode | {} |", self.snapshot.mode);
        let _ = writeln!(output, "| Messages | {} |", messages.len());
        if let (Some(first), Some(last)) = (messages.first(), messages.last()) {
            let _ = writeln!(output, "| Started | {} |", format_timestamp(&first.timestamp));
            let elapsed = (last.timestamp - first.timestamp).num_seconds();
            let _ = writeln!(
                output,
                "| Duration | {} |",
                format_duration(u64::try_from(elapsed).unwrap_or(0))
            );
        }
        let _ = writeln!(output);
    }

    fn write_conversation(&self, output: &mut String) {
        let _ = writeln!(output, "## Conversation\n");

        if self.snapshot.messages.is_empty() {
            let _ = writeln!(output, "*No messages yet.*\n");
            return;
        }

        for message in &self.snapshot.messages {
            Self::write_message(output, message);
        }
    }

    fn write_message(output: &mut String, message: &Message) {
        let author = match message.role {
            Role::User => USER_LABEL,
            Role::Model => MODEL_LABEL,
        };
        let text = escape_markdown(&clean_display_text(&message.text));
        let _ = writeln!(
            output,
            "**{author}** ({}): {}\n",
            message.timestamp.format("%H:%M:%S"),
            text.trim()
        );
    }

    fn write_example(&self, output: &mut String) {
        let Some(content) = &self.snapshot.example.content else {
            return;
        };

        let _ = writeln!(output, "## Worked Example\n");
        let _ = writeln!(output, "```text");
        let _ = writeln!(output, "{}", clean_display_text(content).trim_end());
        let _ = writeln!(output, "```\n");
    }

    fn write_notice(&self, output: &mut String) {
        if let Some(notice) = &self.snapshot.notice {
            let _ = writeln!(output, "> **Notice**: {}\n", escape_markdown(notice));
        }
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by Lumiere at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats seconds as e.g. "1h 1m 1s", "1m 5s" or "45s".
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes characters Markdown would treat as formatting. Newlines become
/// hard line breaks.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("  \n"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
