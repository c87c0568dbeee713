#![forbid(unsafe_code)]

//! `feature-relay`: run the coding assistant for a feature, resuming its
//! previous conversation when possible.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use feature_relay::assistant::AssistantRunner;
use feature_relay::config::GlobalConfig;
use feature_relay::orchestrator::{ContinuityCoordinator, ResumePolicy, SessionRequest};
use feature_relay::persistence::SessionStore;
use feature_relay::project::{FeatureName, ProjectLayout};
use feature_relay::status::{history_line, render_status};
use feature_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "feature-relay",
    about = "Run the coding assistant with per-feature session continuity",
    version,
    long_about = None
)]
struct Cli {
    /// Project root; discovered from the current directory when omitted.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the assistant for a feature.
    Run(RunArgs),
    /// Show the current session for a feature.
    Status {
        /// Feature name.
        feature: String,
    },
    /// List previous sessions for a feature, newest first.
    History {
        /// Feature name.
        feature: String,
        /// Maximum number of entries to show.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mark the feature's current session as completed.
    Complete {
        /// Feature name.
        feature: String,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Feature name.
    feature: String,

    /// Prompt text; read from stdin when neither this nor --prompt-file is given.
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the prompt from a file.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Model to run with.
    #[arg(long)]
    model: Option<String>,

    /// Resume this assistant session id instead of the stored one.
    #[arg(long, conflicts_with = "fresh")]
    resume: Option<String>,

    /// Start a new conversation even if the last one can be resumed.
    #[arg(long)]
    fresh: bool,

    /// Do not ask the assistant to print its session id.
    #[arg(long)]
    no_session_id: bool,

    /// Time budget for this run, in seconds.
    #[arg(long)]
    timeout_seconds: Option<u64>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("✗ {err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|rt| rt.block_on(run(args)));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("✗ {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let layout = match args.project {
        Some(root) => ProjectLayout::new(root),
        None => ProjectLayout::discover(&std::env::current_dir()?),
    };
    debug!(root = %layout.root().display(), "project resolved");

    let config_path = args.config.unwrap_or_else(|| layout.config_path());
    let mut config = GlobalConfig::load_or_default(&config_path)?;
    config.apply_env_overrides()?;

    match args.command {
        Command::Run(run_args) => run_feature(layout, config, run_args).await,
        Command::Status { feature } => {
            let feature = FeatureName::parse(&feature)?;
            let store = SessionStore::new(layout.sessions_path());
            let current = store.get(&feature)?;
            let history = store.list(&feature)?;
            print!(
                "{}",
                render_status(
                    feature.as_str(),
                    current.as_ref(),
                    &history,
                    config.history_display_limit
                )
            );
            Ok(())
        }
        Command::History { feature, limit } => {
            let feature = FeatureName::parse(&feature)?;
            let store = SessionStore::new(layout.sessions_path());
            let history = store.list(&feature)?;
            if history.is_empty() {
                println!("No previous sessions for '{feature}'.");
            }
            for entry in history.iter().take(limit.unwrap_or(usize::MAX)) {
                print!("{}", history_line(entry));
            }
            Ok(())
        }
        Command::Complete { feature } => {
            let feature = FeatureName::parse(&feature)?;
            let store = SessionStore::new(layout.sessions_path());
            let record = store.mark_completed(&feature)?;
            println!("✓ session {} for '{feature}' marked completed", record.id);
            Ok(())
        }
    }
}

async fn run_feature(layout: ProjectLayout, config: GlobalConfig, args: RunArgs) -> Result<()> {
    let prompt = read_prompt(args.prompt, args.prompt_file).await?;

    let resume = match (args.resume, args.fresh) {
        (Some(id), _) => ResumePolicy::Explicit(id),
        (None, true) => ResumePolicy::Fresh,
        (None, false) => ResumePolicy::Auto,
    };

    let mut request = SessionRequest::new(args.feature, prompt).resume(resume);
    request.print_session_id = config.assistant.print_session_id && !args.no_session_id;
    if let Some(model) = args.model {
        request = request.model(model);
    }
    if let Some(secs) = args.timeout_seconds {
        request = request.timeout(Duration::from_secs(secs));
    }

    let runner = AssistantRunner::new(config.assistant.clone());
    let coordinator = ContinuityCoordinator::new(layout, config, runner);
    let record = coordinator.run(request).await?;

    info!(
        feature = %record.feature,
        session_id = %record.id,
        status = %record.status,
        "run finished"
    );
    eprintln!(
        "✓ {} session {} ({})",
        record.feature,
        record.external_session_id.as_deref().unwrap_or("without id"),
        record.status
    );
    Ok(())
}

async fn read_prompt(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    let prompt = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path).await.map_err(|err| {
            AppError::Io(format!("cannot read prompt file {}: {err}", path.display()))
        })?,
        (None, None) => {
            if std::io::stdin().is_terminal() {
                return Err(AppError::Validation(
                    "no prompt given; pass --prompt, --prompt-file, or pipe it on stdin".into(),
                ));
            }
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };

    if prompt.trim().is_empty() {
        return Err(AppError::Validation("prompt must not be empty".into()));
    }
    Ok(prompt)
}

/// Initialize tracing on stderr so mirrored assistant output on stdout stays clean.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
