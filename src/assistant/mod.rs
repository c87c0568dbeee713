//! External assistant process handling.
//!
//! Covers launch-argument construction, prompt staging, output decoding,
//! the timed process run itself, and session-identifier extraction.

pub mod codec;
pub mod launch;
pub mod prompt_file;
pub mod runner;
pub mod session_id;

use std::future::Future;
use std::pin::Pin;

use crate::models::process::{InvokeOptions, ProcessResult};
use crate::Result;

pub use runner::AssistantRunner;
pub use session_id::extract_session_id;

/// Something that can run one assistant invocation to completion.
///
/// [`AssistantRunner`] is the process-backed implementation; the continuity
/// coordinator only depends on this trait.
pub trait Invoker: Send + Sync {
    /// Run the assistant with `prompt` on stdin and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`](crate::AppError::Launch) if the assistant
    /// could not be started and [`AppError::Timeout`](crate::AppError::Timeout)
    /// if it exceeded `options.timeout`.
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        options: InvokeOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessResult>> + Send + 'a>>;
}

impl Invoker for AssistantRunner {
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        options: InvokeOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessResult>> + Send + 'a>> {
        Box::pin(AssistantRunner::invoke(self, prompt, options))
    }
}
