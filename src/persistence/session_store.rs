//! Session record store backed by a JSON document.
//!
//! One document per project holds, for every feature, the current
//! [`SessionRecord`] plus an append-only history of previous currents:
//!
//! ```json
//! {
//!   "version": 1,
//!   "features": {
//!     "auth": { "current": { ... }, "history": [ { ... }, { ... } ] }
//!   }
//! }
//! ```
//!
//! History is stored oldest-first and returned newest-first. Keys this crate
//! does not know about are kept at every level and written back unchanged.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the document, so a failed save leaves the previous state intact.
//! There is no cross-process locking: two processes saving the same feature
//! concurrently can lose an update.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::models::session::{SessionRecord, SessionStatus};
use crate::project::FeatureName;
use crate::{AppError, Result};

/// Current on-disk document version.
pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// Session state for one feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSessions {
    /// Most recent session.
    #[serde(default)]
    pub current: Option<SessionRecord>,
    /// Previous currents, oldest first.
    #[serde(default)]
    pub history: Vec<SessionRecord>,
    /// Fields written by other tooling; preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoreDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    features: BTreeMap<String, FeatureSessions>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            features: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

/// File-backed store of current sessions and history, keyed by feature.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Create a store backed by the document at `path`.
    ///
    /// Nothing is read or created until the first operation.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current session for `feature`, if one was ever saved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be read or parsed.
    pub fn get(&self, feature: &FeatureName) -> Result<Option<SessionRecord>> {
        let mut doc = self.load()?;
        Ok(doc
            .features
            .remove(feature.as_str())
            .and_then(|sessions| sessions.current))
    }

    /// Session history for `feature`, newest first. The current record is
    /// not included.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be read or parsed.
    pub fn list(&self, feature: &FeatureName) -> Result<Vec<SessionRecord>> {
        let mut doc = self.load()?;
        let mut history = doc
            .features
            .remove(feature.as_str())
            .map(|sessions| sessions.history)
            .unwrap_or_default();
        history.reverse();
        Ok(history)
    }

    /// Whether `feature` has a current session that can be resumed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be read or parsed.
    pub fn is_resumable(&self, feature: &FeatureName) -> Result<bool> {
        Ok(self
            .get(feature)?
            .is_some_and(|record| record.resume_target().is_some()))
    }

    /// Make `record` the current session for `feature`, moving the previous
    /// current (if any) to the end of its history.
    ///
    /// The document is rewritten before this returns. On failure the
    /// document on disk is unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` if `record` names a different feature or its
    ///   `resumable` flag disagrees with its external session id.
    /// - `AppError::Persistence` if reading or writing the document fails.
    pub fn save(&self, feature: &FeatureName, record: &SessionRecord) -> Result<()> {
        if record.feature != feature.as_str() {
            return Err(AppError::Validation(format!(
                "record belongs to feature '{}', not '{feature}'",
                record.feature
            )));
        }

        if record.resumable != record.external_session_id.is_some() {
            return Err(AppError::Validation(format!(
                "record {} is marked resumable={} but external session id is {}",
                record.id,
                record.resumable,
                if record.external_session_id.is_some() {
                    "present"
                } else {
                    "absent"
                }
            )));
        }

        let mut doc = self.load()?;
        let sessions = doc.features.entry(feature.as_str().to_owned()).or_default();
        if let Some(previous) = sessions.current.replace(record.clone()) {
            sessions.history.push(previous);
        }
        let history_len = sessions.history.len();

        self.write(&doc)?;
        info!(
            feature = %feature,
            session_id = %record.id,
            status = %record.status,
            resumable = record.resumable,
            history_len,
            "session saved"
        );
        Ok(())
    }

    /// Mark the current session for `feature` as completed.
    ///
    /// This is the only path that writes [`SessionStatus::Completed`]; the
    /// invocation path never does. History is left untouched.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if `feature` has no current session.
    /// - `AppError::Persistence` if reading or writing the document fails.
    pub fn mark_completed(&self, feature: &FeatureName) -> Result<SessionRecord> {
        let mut doc = self.load()?;
        let current = doc
            .features
            .get_mut(feature.as_str())
            .and_then(|sessions| sessions.current.as_mut())
            .ok_or_else(|| {
                AppError::NotFound(format!("feature '{feature}' has no recorded session"))
            })?;

        current.status = SessionStatus::Completed;
        let completed = current.clone();

        self.write(&doc)?;
        info!(feature = %feature, session_id = %completed.id, "session marked completed");
        Ok(completed)
    }

    /// Names of all features with session data, sorted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be read or parsed.
    pub fn features(&self) -> Result<Vec<String>> {
        Ok(self.load()?.features.into_keys().collect())
    }

    fn load(&self) -> Result<StoreDocument> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session store absent, starting empty");
                return Ok(StoreDocument::default());
            }
            Err(err) => {
                return Err(AppError::Persistence(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&raw).map_err(|err| {
            AppError::Persistence(format!("failed to parse {}: {err}", self.path.display()))
        })
    }

    fn write(&self, doc: &StoreDocument) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        fs::create_dir_all(parent).map_err(|err| {
            AppError::Persistence(format!(
                "failed to create store directory {}: {err}",
                parent.display()
            ))
        })?;

        let mut json = serde_json::to_string_pretty(doc).map_err(|err| {
            AppError::Persistence(format!("failed to serialize session store: {err}"))
        })?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(parent).map_err(|err| {
            AppError::Persistence(format!("failed to create temporary store file: {err}"))
        })?;

        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| {
                AppError::Persistence(format!("failed to write temporary store file: {err}"))
            })?;

        tmp.persist(&self.path).map_err(|err| {
            AppError::Persistence(format!(
                "failed to persist session store to {}: {err}",
                self.path.display()
            ))
        })?;

        Ok(())
    }
}
