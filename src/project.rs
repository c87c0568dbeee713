//! Project layout and feature-name validation.
//!
//! Every path this crate touches is derived from an explicit
//! [`ProjectLayout`]; nothing below reads the current directory on its own.
//! Feature names become path segments, so they are validated up front and
//! rejected before any file or process activity.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Name of the tooling directory kept at the project root.
pub const TOOLING_DIR: &str = ".feature-relay";

/// Characters that can never appear in a feature name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0', ':'];

/// A validated feature name, safe to use as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureName(String);

impl FeatureName {
    /// Validate `raw` as a feature name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the name is empty, starts with a
    /// dot, contains `..`, a path separator, or a control character.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(AppError::Validation("feature name must not be empty".into()));
        }

        if raw.contains("..") {
            return Err(AppError::Validation(format!(
                "feature name '{raw}' attempts path traversal"
            )));
        }

        if raw.starts_with('.') {
            return Err(AppError::Validation(format!(
                "feature name '{raw}' must not start with '.'"
            )));
        }

        if let Some(bad) = raw
            .chars()
            .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
        {
            return Err(AppError::Validation(format!(
                "feature name '{}' contains forbidden character {bad:?}",
                raw.escape_debug()
            )));
        }

        Ok(Self(raw.to_owned()))
    }

    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FeatureName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeatureName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// On-disk layout of a project's tooling directory.
///
/// ```text
/// <root>/
/// └── .feature-relay/
///     ├── config.toml      # optional
///     ├── sessions.json    # session record store
///     └── features/
///         └── <feature>/   # owned by the feature tracker
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at an explicit project directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the nearest directory containing the tooling
    /// directory or a `.git` entry; `start` itself when neither is found.
    #[must_use]
    pub fn discover(start: &Path) -> Self {
        let found = start
            .ancestors()
            .find(|dir| dir.join(TOOLING_DIR).is_dir() || dir.join(".git").exists());
        Self::new(found.unwrap_or(start))
    }

    /// Project root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tooling directory (`<root>/.feature-relay`).
    #[must_use]
    pub fn tooling_dir(&self) -> PathBuf {
        self.root.join(TOOLING_DIR)
    }

    /// Path of the session record store.
    #[must_use]
    pub fn sessions_path(&self) -> PathBuf {
        self.tooling_dir().join("sessions.json")
    }

    /// Default config file location.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.tooling_dir().join("config.toml")
    }

    /// Directory owned by the feature tracker for `feature`.
    #[must_use]
    pub fn feature_dir(&self, feature: &FeatureName) -> PathBuf {
        self.tooling_dir().join("features").join(feature.as_str())
    }

    /// Require the feature's directory to exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the directory is missing.
    pub fn ensure_feature(&self, feature: &FeatureName) -> Result<PathBuf> {
        let dir = self.feature_dir(feature);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(AppError::NotFound(format!(
                "feature '{feature}' has no directory at {}",
                dir.display()
            )))
        }
    }
}
