//! Private staging of prompt text for delivery over stdin.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// A prompt written to a uniquely named, owner-only temporary file.
///
/// The file is removed when the value is dropped or [`StagedPrompt::remove`]
/// is called; removal failures are logged and never escalated.
#[derive(Debug)]
pub struct StagedPrompt {
    file: NamedTempFile,
}

impl StagedPrompt {
    /// Write `prompt` into a new temporary file under `dir` (or the system
    /// temp directory when `None`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be created or written.
    pub fn stage(prompt: &str, dir: Option<&Path>) -> Result<Self> {
        // Timestamp plus tempfile's random suffix; unique per invocation.
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let prefix = format!("feature-relay-prompt-{stamp}-");

        let mut builder = Builder::new();
        builder.prefix(&prefix).suffix(".md");

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|err| AppError::Io(format!("failed to stage prompt: {err}")))?;

        file.write_all(prompt.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| AppError::Io(format!("failed to write staged prompt: {err}")))?;

        debug!(path = %file.path().display(), bytes = prompt.len(), "prompt staged");
        Ok(Self { file })
    }

    /// Path of the staged file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the staged file, swallowing any failure.
    pub fn remove(self) {
        let path: PathBuf = self.file.path().to_path_buf();
        if let Err(err) = self.file.close() {
            warn!(path = %path.display(), %err, "failed to remove staged prompt");
        }
    }
}
