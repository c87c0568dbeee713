//! Assistant invocation inputs and results.

use std::fmt;
use std::time::Duration;

/// Callback receiving each incremental stdout chunk, in arrival order.
pub type OutputSink = Box<dyn FnMut(&str) + Send>;

/// Outcome of a completed assistant process.
///
/// Built only by [`crate::assistant::runner`]; a non-zero `exit_code` is data,
/// not failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Full stdout, concatenated in emission order.
    pub output: String,
    /// Identifier parsed from stdout, falling back to stderr.
    pub external_session_id: Option<String>,
    /// Process exit code; 0 when the platform reports none.
    pub exit_code: i32,
    /// Wall-clock duration of the invocation.
    pub duration_ms: u64,
}

/// Options controlling a single assistant invocation.
pub struct InvokeOptions {
    /// Model variant passed as `--model`.
    pub model: Option<String>,
    /// External session to continue, passed as `--resume`.
    pub resume: Option<String>,
    /// Request `--print-session-id`.
    pub print_session_id: bool,
    /// Wall-clock budget for the whole invocation.
    pub timeout: Duration,
    /// Live stdout sink.
    pub on_output: Option<OutputSink>,
}

impl InvokeOptions {
    /// Default invocation budget (300 seconds).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300_000);

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the external session to resume.
    #[must_use]
    pub fn resume(mut self, id: impl Into<String>) -> Self {
        self.resume = Some(id.into());
        self
    }

    /// Set the invocation budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a live stdout sink.
    #[must_use]
    pub fn on_output(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_output = Some(Box::new(sink));
        self
    }
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            model: None,
            resume: None,
            print_session_id: true,
            timeout: Self::DEFAULT_TIMEOUT,
            on_output: None,
        }
    }
}

impl fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("model", &self.model)
            .field("resume", &self.resume)
            .field("print_session_id", &self.print_session_id)
            .field("timeout", &self.timeout)
            .field("on_output", &self.on_output.is_some())
            .finish()
    }
}
