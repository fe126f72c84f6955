//! JSON transcripts of tutoring sessions.
//!
//! [`JsonTranscript`] serializes a [`SessionSnapshot`] either as compact
//! single-line JSON or pretty-printed for reading.
//!
//! # Example
//!
//! ```rust
//! use lumiere_session::{SessionSnapshot, SessionState};
//! use lumiere_view::JsonTranscript;
//!
//! let snapshot = SessionSnapshot::from_state(&SessionState::new(), 0, None);
//! let transcript = JsonTranscript::new(&snapshot);
//!
//! let compact = transcript.generate().unwrap();
//! assert!(compact.contains(r#""mode":"capturing""#));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use lumiere_session::SessionSnapshot;

use crate::Result;

/// JSON transcript generator.
pub struct JsonTranscript<'a> {
    snapshot: &'a SessionSnapshot,
}

impl<'a> JsonTranscript<'a> {
    /// Creates a generator for the given snapshot.
    #[must_use]
    pub const fn new(snapshot: &'a SessionSnapshot) -> Self {
        Self { snapshot }
    }

    /// Serializes the snapshot as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Serialization`](crate::ViewError::Serialization)
    /// if serialization fails.
    pub fn generate(&self) -> Result<String> {
        Ok(serde_json::to_string(self.snapshot)?)
    }

    /// Serializes the snapshot as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Serialization`](crate::ViewError::Serialization)
    /// if serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.snapshot)?)
    }

    /// Writes the transcript to `path`, pretty-printed when `pretty` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Io`](crate::ViewError::Io) if the file cannot be
    /// written, or a serialization error.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(())
    }
}
