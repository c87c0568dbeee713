//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Environment variable overriding [`AssistantConfig::cli`].
pub const ENV_CLI: &str = "FEATURE_RELAY_CLI";
/// Environment variable overriding [`AssistantConfig::model`].
pub const ENV_MODEL: &str = "FEATURE_RELAY_MODEL";
/// Environment variable overriding [`AssistantConfig::timeout_seconds`].
pub const ENV_TIMEOUT_SECONDS: &str = "FEATURE_RELAY_TIMEOUT_SECONDS";

/// How the external assistant is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AssistantConfig {
    /// Assistant binary (e.g., `claude`).
    #[serde(default = "default_cli")]
    pub cli: String,
    /// Arguments placed before the generated launch flags.
    #[serde(default)]
    pub cli_args: Vec<String>,
    /// Flag that disables the assistant's interactive permission prompts.
    #[serde(default = "default_permission_flag")]
    pub permission_flag: String,
    /// Model used when the caller does not pick one.
    #[serde(default)]
    pub model: Option<String>,
    /// Wall-clock budget for a single invocation.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Whether to request `--print-session-id` by default.
    #[serde(default = "default_true")]
    pub print_session_id: bool,
    /// Mirror assistant output to this process's stdout/stderr.
    #[serde(default = "default_true")]
    pub mirror_output: bool,
    /// Directory for staged prompt files; the system temp dir when unset.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            cli_args: Vec::new(),
            permission_flag: default_permission_flag(),
            model: None,
            timeout_seconds: default_timeout_seconds(),
            print_session_id: true,
            mirror_output: true,
            prompt_dir: None,
        }
    }
}

impl AssistantConfig {
    /// Default invocation budget as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_cli() -> String {
    "claude".into()
}

fn default_permission_flag() -> String {
    "--dangerously-skip-permissions".into()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_history_display_limit() -> usize {
    crate::status::DEFAULT_HISTORY_LIMIT
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Assistant launch settings.
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Require `<tooling>/features/<name>` to exist before running a feature.
    #[serde(default)]
    pub require_feature_dir: bool,
    /// Number of history entries shown by `status`.
    #[serde(default = "default_history_display_limit")]
    pub history_display_limit: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig::default(),
            require_feature_dir: false,
            history_display_limit: default_history_display_limit(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|err| {
            AppError::Config(format!(
                "failed to read config {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load the config file if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but is invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_path(path)
        } else {
            debug!(path = %path.as_ref().display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FEATURE_RELAY_*` environment overrides and re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override is malformed.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(cli) = env::var(ENV_CLI) {
            debug!(cli = %cli, "assistant cli overridden from environment");
            self.assistant.cli = cli;
        }

        if let Ok(model) = env::var(ENV_MODEL) {
            if model.trim().is_empty() {
                warn!("{ENV_MODEL} is empty, ignoring");
            } else {
                self.assistant.model = Some(model);
            }
        }

        if let Ok(raw) = env::var(ENV_TIMEOUT_SECONDS) {
            self.assistant.timeout_seconds = raw.trim().parse().map_err(|err| {
                AppError::Config(format!("{ENV_TIMEOUT_SECONDS} must be an integer: {err}"))
            })?;
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.assistant.cli.trim().is_empty() {
            return Err(AppError::Config("assistant.cli must not be empty".into()));
        }

        if self.assistant.timeout_seconds == 0 {
            return Err(AppError::Config(
                "assistant.timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
