//! Session continuity across assistant invocations.
//!
//! For a feature, the coordinator looks up the current session record,
//! decides whether to resume it, runs the assistant, and writes the new
//! record back. Invocations for the same feature in one process are
//! serialised by a per-feature async mutex; separate processes are not
//! coordinated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use crate::assistant::Invoker;
use crate::config::GlobalConfig;
use crate::errors::InvocationPhase;
use crate::models::process::{InvokeOptions, OutputSink};
use crate::models::session::{SessionMetadata, SessionRecord, SessionStatus};
use crate::persistence::SessionStore;
use crate::project::{FeatureName, ProjectLayout};
use crate::{AppError, Result};

/// How the coordinator picks a conversation to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Resume the feature's current session when it is resumable.
    #[default]
    Auto,
    /// Resume this external session id regardless of stored state.
    Explicit(String),
    /// Start a new conversation even if one could be resumed.
    Fresh,
}

/// One request to run the assistant for a feature.
pub struct SessionRequest {
    /// Raw feature name; validated before anything else happens.
    pub feature: String,
    /// Prompt delivered to the assistant on stdin.
    pub prompt: String,
    /// Model override; falls back to the configured default.
    pub model: Option<String>,
    /// Resume behaviour.
    pub resume: ResumePolicy,
    /// Ask the assistant to print its session id.
    pub print_session_id: bool,
    /// Budget override; falls back to the configured timeout.
    pub timeout: Option<Duration>,
    /// Receives stdout chunks as they arrive.
    pub on_output: Option<OutputSink>,
}

impl SessionRequest {
    /// Request with automatic resume and configured defaults.
    #[must_use]
    pub fn new(feature: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            prompt: prompt.into(),
            model: None,
            resume: ResumePolicy::Auto,
            print_session_id: true,
            timeout: None,
            on_output: None,
        }
    }

    /// Run with `model` instead of the configured default.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the resume policy.
    #[must_use]
    pub fn resume(mut self, policy: ResumePolicy) -> Self {
        self.resume = policy;
        self
    }

    /// Override the configured timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Forward stdout chunks to `sink`.
    #[must_use]
    pub fn on_output(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_output = Some(Box::new(sink));
        self
    }
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("feature", &self.feature)
            .field("prompt_bytes", &self.prompt.len())
            .field("model", &self.model)
            .field("resume", &self.resume)
            .field("print_session_id", &self.print_session_id)
            .field("timeout", &self.timeout)
            .field("on_output", &self.on_output.is_some())
            .finish()
    }
}

/// Runs the assistant for a feature and keeps its session record current.
pub struct ContinuityCoordinator<I> {
    layout: ProjectLayout,
    store: SessionStore,
    config: GlobalConfig,
    invoker: I,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<I: Invoker> ContinuityCoordinator<I> {
    /// Coordinator for the project at `layout`, persisting to its
    /// `sessions.json`.
    #[must_use]
    pub fn new(layout: ProjectLayout, config: GlobalConfig, invoker: I) -> Self {
        let store = SessionStore::new(layout.sessions_path());
        Self::with_store(layout, store, config, invoker)
    }

    /// Coordinator using an explicitly located store.
    #[must_use]
    pub fn with_store(
        layout: ProjectLayout,
        store: SessionStore,
        config: GlobalConfig,
        invoker: I,
    ) -> Self {
        Self {
            layout,
            store,
            config,
            invoker,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run the assistant for `request.feature` and persist the resulting
    /// session record, which is also returned.
    ///
    /// Nothing is written when the invocation fails.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for a malformed feature name or a zero
    ///   timeout.
    /// - `AppError::NotFound` when feature directories are required and the
    ///   feature has none.
    /// - `AppError::Invocation` wrapping the store or assistant failure,
    ///   tagged with the phase it happened in.
    pub async fn run(&self, request: SessionRequest) -> Result<SessionRecord> {
        let feature = FeatureName::parse(&request.feature)?;
        if request.timeout.is_some_and(|t| t.is_zero()) {
            return Err(AppError::Validation("timeout must be greater than zero".into()));
        }
        if self.config.require_feature_dir {
            self.layout.ensure_feature(&feature)?;
        }

        let lock = self.feature_lock(&feature);
        let result = {
            let _guard = lock.lock().await;
            let span = info_span!("continuity_run", feature = %feature);
            self.run_locked(&feature, request).instrument(span).await
        };
        self.release_lock(&feature, lock);
        result
    }

    /// Number of features whose lock is currently held or awaited.
    #[must_use]
    pub fn active_features(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn run_locked(
        &self,
        feature: &FeatureName,
        request: SessionRequest,
    ) -> Result<SessionRecord> {
        let name = feature.as_str();

        let current = self
            .store
            .get(feature)
            .map_err(|err| err.during(name, InvocationPhase::LoadSession))?;

        let resume = match &request.resume {
            ResumePolicy::Explicit(id) => Some(id.clone()),
            ResumePolicy::Fresh => None,
            ResumePolicy::Auto => current
                .as_ref()
                .and_then(SessionRecord::resume_target)
                .map(str::to_owned),
        };

        let model = request
            .model
            .clone()
            .or_else(|| self.config.assistant.model.clone());
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.assistant.timeout());

        info!(
            resume = resume.as_deref().unwrap_or("none"),
            model = model.as_deref().unwrap_or("default"),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "invoking assistant"
        );

        let options = InvokeOptions {
            model: model.clone(),
            resume,
            print_session_id: request.print_session_id,
            timeout,
            on_output: request.on_output,
        };

        let started_at = Utc::now();
        let result = self
            .invoker
            .invoke(&request.prompt, options)
            .await
            .map_err(|err| {
                warn!(%err, "assistant invocation failed, session left unchanged");
                err.during(name, InvocationPhase::Invoke)
            })?;
        let finished_at = Utc::now();

        let started_at = match (&request.resume, &current) {
            (ResumePolicy::Fresh, _) | (_, None) => started_at,
            (_, Some(previous)) => previous.started_at,
        };

        let status = SessionStatus::from_exit_code(result.exit_code);
        let record = SessionRecord::new(
            name,
            result.external_session_id.clone(),
            status,
            started_at,
            finished_at,
        )
        .with_metadata(SessionMetadata {
            model,
            exit_code: Some(result.exit_code),
            duration: Some(result.duration_ms),
            ..SessionMetadata::default()
        });

        self.store
            .save(feature, &record)
            .map_err(|err| err.during(name, InvocationPhase::SaveSession))?;

        info!(
            session_id = %record.id,
            external_session_id = record.external_session_id.as_deref().unwrap_or("none"),
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            %status,
            "session recorded"
        );
        Ok(record)
    }

    fn feature_lock(&self, feature: &FeatureName) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(feature.as_str().to_owned()).or_default())
    }

    /// Drop `lock` and forget the feature once no other run holds a handle.
    fn release_lock(&self, feature: &FeatureName, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = locks
            .get(feature.as_str())
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if idle {
            locks.remove(feature.as_str());
        }
    }
}
