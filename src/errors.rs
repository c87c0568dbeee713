//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Stage of a continuity invocation in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPhase {
    /// Reading the feature's current session record.
    LoadSession,
    /// Running the external assistant process.
    Invoke,
    /// Writing the new session record.
    SaveSession,
}

impl Display for InvocationPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::LoadSession => "load-session",
            Self::Invoke => "invoke",
            Self::SaveSession => "save-session",
        };
        f.write_str(label)
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Malformed input rejected before any I/O (e.g. a feature name with path separators).
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The external assistant binary could not be started.
    Launch(String),
    /// The invocation exceeded its wall-clock budget and the process was terminated.
    Timeout(Duration),
    /// The session record store failed to read or write.
    Persistence(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or stream I/O failure.
    Io(String),
    /// A coordinator failure annotated with the feature and phase it occurred in.
    Invocation {
        /// Feature the invocation was running for.
        feature: String,
        /// Phase that failed.
        phase: InvocationPhase,
        /// Underlying failure.
        source: Box<AppError>,
    },
}

impl AppError {
    /// Wrap `self` with the feature and phase of a coordinator invocation.
    #[must_use]
    pub fn during(self, feature: &str, phase: InvocationPhase) -> Self {
        Self::Invocation {
            feature: feature.to_owned(),
            phase,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any invocation context wrappers.
    #[must_use]
    pub fn root(&self) -> &AppError {
        match self {
            Self::Invocation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Launch(msg) => write!(f, "launch failure: {msg}"),
            Self::Timeout(budget) => write!(
                f,
                "timeout: assistant exceeded its {}ms budget",
                budget.as_millis()
            ),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Invocation {
                feature,
                phase,
                source,
            } => write!(f, "feature '{feature}' failed during {phase}: {source}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invocation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
