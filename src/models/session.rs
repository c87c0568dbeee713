//! Session record model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle status for a feature's session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Last invocation exited cleanly; the conversation can continue.
    Active,
    /// Feature marked done by a higher-level decision.
    Completed,
    /// Last invocation exited with a non-zero code.
    Interrupted,
}

impl SessionStatus {
    /// Status implied by an assistant exit code.
    #[must_use]
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self::Active
        } else {
            Self::Interrupted
        }
    }

    /// Lowercase label as persisted on disk.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the most recent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Model the assistant ran with, if one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Process exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Fields written by other tooling; preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One continuity-tracked run of the external assistant for a feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Locally generated identifier (UUID v7, sorts by creation time).
    pub id: String,
    /// Identifier the assistant reported for its own conversation.
    #[serde(default)]
    pub external_session_id: Option<String>,
    /// Feature this session belongs to.
    pub feature: String,
    /// When the conversation began; carried forward across resumes.
    pub started_at: DateTime<Utc>,
    /// End of the most recent invocation.
    pub last_activity: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Whether a later invocation can resume this conversation.
    pub resumable: bool,
    /// Snapshot of the most recent invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
    /// Fields written by other tooling; preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    /// Construct a record for `feature`, deriving `resumable` from the
    /// presence of `external_session_id`.
    #[must_use]
    pub fn new(
        feature: impl Into<String>,
        external_session_id: Option<String>,
        status: SessionStatus,
        started_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Self {
        let resumable = external_session_id.is_some();
        Self {
            id: new_local_id(),
            external_session_id,
            feature: feature.into(),
            started_at,
            last_activity: last_activity.max(started_at),
            status,
            resumable,
            metadata: None,
            extra: Map::new(),
        }
    }

    /// Attach an invocation snapshot.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SessionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// External identifier to resume, present only for resumable records.
    #[must_use]
    pub fn resume_target(&self) -> Option<&str> {
        if self.resumable {
            self.external_session_id.as_deref()
        } else {
            None
        }
    }

    /// Model recorded in the metadata snapshot.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.model.as_deref())
    }
}

/// Generate a unique, creation-ordered local session identifier.
#[must_use]
pub fn new_local_id() -> String {
    Uuid::now_v7().to_string()
}
