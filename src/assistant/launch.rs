//! Launch arguments for the external assistant.

use crate::config::AssistantConfig;
use crate::models::process::InvokeOptions;

/// Flag asking the assistant to print its session identifier.
pub const PRINT_SESSION_ID_FLAG: &str = "--print-session-id";

/// Binary and arguments for one assistant invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Assistant binary.
    pub program: String,
    /// Full argument list, in order.
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Build the launch line from config and per-invocation options.
    ///
    /// Order: configured leading args, the permission-bypass flag (always),
    /// `--print-session-id` unless disabled, `--model` when a model is set,
    /// `--resume` when a resume target was resolved. The prompt is never an
    /// argument.
    #[must_use]
    pub fn build(config: &AssistantConfig, options: &InvokeOptions) -> Self {
        let mut args = config.cli_args.clone();
        args.push(config.permission_flag.clone());

        if options.print_session_id {
            args.push(PRINT_SESSION_ID_FLAG.to_owned());
        }

        if let Some(model) = options.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("--model".to_owned());
            args.push(model.to_owned());
        }

        if let Some(id) = options.resume.as_deref().filter(|id| !id.is_empty()) {
            args.push("--resume".to_owned());
            args.push(id.to_owned());
        }

        Self {
            program: config.cli.clone(),
            args,
        }
    }
}
