//! Assistant process execution.
//!
//! [`AssistantRunner::start`] launches the assistant and returns an
//! [`AssistantRun`]: a lazy, finite, non-restartable sequence of
//! [`RunEvent`]s. Output chunks arrive in emission order and the sequence
//! ends with exactly one [`RunEvent::Exited`], or with an error item when the
//! budget expires or a stream fails. Nothing is yielded after that.
//!
//! [`AssistantRunner::invoke`] is built on the same sequence with two
//! consumers: an [`OutputBuffer`] that accumulates the transcript, and the
//! live consumers (the caller's `on_output` sink plus mirroring to this
//! process's stdout/stderr).

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures_util::{stream, Stream, StreamExt};
use tokio::io::{AsyncWriteExt, Stderr, Stdout};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::ChunkCodec;
use super::launch::LaunchSpec;
use super::prompt_file::StagedPrompt;
use super::session_id::extract_session_id;
use crate::config::AssistantConfig;
use crate::models::process::{InvokeOptions, ProcessResult};
use crate::{AppError, Result};

/// How long a signalled process gets to exit before it is force-killed.
///
/// The wait happens on a background task; the run reports its timeout as
/// soon as the signal is sent.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Which standard stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// A decoded piece of assistant output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source stream.
    pub stream: StreamKind,
    /// Decoded text; never splits a UTF-8 character.
    pub text: String,
}

/// Final status of a run that completed before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunExit {
    /// Exit code; 0 when the platform reports none.
    pub exit_code: i32,
    /// Wall-clock duration since launch.
    pub duration_ms: u64,
}

/// One item of an [`AssistantRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Incremental output.
    Output(OutputChunk),
    /// The process exited; always the last event.
    Exited(RunExit),
}

enum Step {
    Deadline,
    Stdout(Option<Result<String>>),
    Stderr(Option<Result<String>>),
    Exited(std::io::Result<ExitStatus>),
}

/// A running assistant process viewed as a sequence of [`RunEvent`]s.
///
/// Dropping an unsettled run kills the process and removes the staged
/// prompt.
pub struct AssistantRun {
    child: Option<Child>,
    pid: Option<u32>,
    stdout: FramedRead<ChildStdout, ChunkCodec>,
    stderr: FramedRead<ChildStderr, ChunkCodec>,
    stdout_open: bool,
    stderr_open: bool,
    deadline: Option<Pin<Box<Sleep>>>,
    budget: Duration,
    started: Instant,
    prompt: Option<StagedPrompt>,
    feeder: Option<JoinHandle<()>>,
}

impl AssistantRun {
    /// OS process id of the assistant, if it was still known at launch.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Pull the next event; `None` once the run has settled.
    pub async fn next_event(&mut self) -> Option<Result<RunEvent>> {
        loop {
            let deadline = self.deadline.as_mut()?;
            let child = self.child.as_mut()?;

            let step = if self.stdout_open || self.stderr_open {
                tokio::select! {
                    biased;
                    () = deadline => Step::Deadline,
                    frame = self.stdout.next(), if self.stdout_open => Step::Stdout(frame),
                    frame = self.stderr.next(), if self.stderr_open => Step::Stderr(frame),
                }
            } else {
                tokio::select! {
                    biased;
                    () = deadline => Step::Deadline,
                    status = child.wait() => Step::Exited(status),
                }
            };

            match step {
                Step::Deadline => return Some(Err(self.expire())),
                Step::Stdout(Some(Ok(text))) => {
                    return Some(Ok(RunEvent::Output(OutputChunk {
                        stream: StreamKind::Stdout,
                        text,
                    })));
                }
                Step::Stderr(Some(Ok(text))) => {
                    return Some(Ok(RunEvent::Output(OutputChunk {
                        stream: StreamKind::Stderr,
                        text,
                    })));
                }
                Step::Stdout(Some(Err(err))) | Step::Stderr(Some(Err(err))) => {
                    return Some(Err(self.abort(err)));
                }
                Step::Stdout(None) => self.stdout_open = false,
                Step::Stderr(None) => self.stderr_open = false,
                Step::Exited(Ok(status)) => {
                    let exit = RunExit {
                        exit_code: status.code().unwrap_or(0),
                        duration_ms: elapsed_ms(self.started),
                    };
                    info!(
                        pid = self.pid,
                        exit_code = exit.exit_code,
                        duration_ms = exit.duration_ms,
                        "assistant exited"
                    );
                    self.settle();
                    return Some(Ok(RunEvent::Exited(exit)));
                }
                Step::Exited(Err(err)) => {
                    let err = AppError::Io(format!("failed to wait for assistant: {err}"));
                    return Some(Err(self.abort(err)));
                }
            }
        }
    }

    /// Consume the run as a [`Stream`] of events.
    #[must_use]
    pub fn into_stream(self) -> impl Stream<Item = Result<RunEvent>> + Send {
        stream::unfold(self, |mut run| async move {
            run.next_event().await.map(|event| (event, run))
        })
    }

    fn expire(&mut self) -> AppError {
        warn!(
            pid = self.pid,
            budget_ms = elapsed_budget_ms(self.budget),
            "assistant exceeded its budget, terminating"
        );
        self.terminate();
        self.settle();
        AppError::Timeout(self.budget)
    }

    fn abort(&mut self, err: AppError) -> AppError {
        warn!(pid = self.pid, %err, "assistant stream failed, terminating");
        self.terminate();
        self.settle();
        err
    }

    /// Signal the process and hand it to a reaper task.
    ///
    /// SIGTERM is delivered before this returns; the reaper waits up to
    /// [`TERMINATE_GRACE`] and then force-kills.
    fn terminate(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        let signalled = match child.id().and_then(|pid| i32::try_from(pid).ok()) {
            Some(pid) => {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    Ok(()) => true,
                    Err(err) => {
                        debug!(pid, %err, "SIGTERM delivery failed");
                        false
                    }
                }
            }
            None => false,
        };
        #[cfg(not(unix))]
        let signalled = false;

        tokio::spawn(reap(child, self.pid, signalled));
    }

    /// Disarm the deadline and release per-invocation resources.
    fn settle(&mut self) {
        self.deadline = None;
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        if let Some(prompt) = self.prompt.take() {
            prompt.remove();
        }
    }
}

/// Wait out the grace period for a signalled child, then kill it.
async fn reap(mut child: Child, pid: Option<u32>, signalled: bool) {
    if signalled {
        if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            debug!(pid, ?status, "assistant exited after SIGTERM");
            return;
        }
    }

    match child.kill().await {
        Ok(()) => debug!(pid, "assistant force-killed"),
        Err(err) => warn!(pid, %err, "failed to kill assistant process"),
    }
}

impl Drop for AssistantRun {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// Accumulates a run's transcript per stream.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    stdout: String,
    stderr: String,
}

impl OutputBuffer {
    /// Append a chunk to its stream's buffer.
    pub fn push(&mut self, chunk: &OutputChunk) {
        match chunk.stream {
            StreamKind::Stdout => self.stdout.push_str(&chunk.text),
            StreamKind::Stderr => self.stderr.push_str(&chunk.text),
        }
    }

    /// Build the final result, extracting the session identifier from stdout
    /// first and falling back to stderr.
    #[must_use]
    pub fn into_result(self, exit: RunExit) -> ProcessResult {
        let external_session_id =
            extract_session_id(&self.stdout).or_else(|| extract_session_id(&self.stderr));
        ProcessResult {
            output: self.stdout,
            external_session_id,
            exit_code: exit.exit_code,
            duration_ms: exit.duration_ms,
        }
    }
}

/// Copies chunks to this process's own stdout/stderr.
struct Mirror {
    stdout: Stdout,
    stderr: Stderr,
    broken: bool,
}

impl Mirror {
    fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
            broken: false,
        }
    }

    async fn write(&mut self, chunk: &OutputChunk) {
        if self.broken {
            return;
        }
        let result = match chunk.stream {
            StreamKind::Stdout => write_flush(&mut self.stdout, &chunk.text).await,
            StreamKind::Stderr => write_flush(&mut self.stderr, &chunk.text).await,
        };
        if let Err(err) = result {
            warn!(%err, "mirroring assistant output failed, continuing without it");
            self.broken = true;
        }
    }
}

async fn write_flush<W: AsyncWriteExt + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

/// Launches the external assistant.
#[derive(Debug, Clone)]
pub struct AssistantRunner {
    config: AssistantConfig,
}

impl AssistantRunner {
    /// Create a runner for the configured assistant.
    #[must_use]
    pub fn new(config: AssistantConfig) -> Self {
        Self { config }
    }

    /// Launch configuration this runner uses.
    #[must_use]
    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Stage the prompt, launch the assistant, and start feeding stdin.
    ///
    /// The deadline starts counting here. `options.on_output` is ignored;
    /// consumers of the returned run see every chunk themselves.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if the prompt cannot be staged.
    /// - `AppError::Launch` if the binary cannot be started or its pipes
    ///   cannot be captured.
    pub fn start(&self, prompt: &str, options: &InvokeOptions) -> Result<AssistantRun> {
        let launch = LaunchSpec::build(&self.config, options);
        let staged = StagedPrompt::stage(prompt, self.config.prompt_dir.as_deref())?;

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                staged.remove();
                return Err(AppError::Launch(format!(
                    "failed to start '{}': {err}",
                    launch.program
                )));
            }
        };

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            staged.remove();
            return Err(AppError::Launch(
                "failed to capture assistant stdio pipes".into(),
            ));
        };

        let pid = child.id();
        info!(
            pid,
            program = %launch.program,
            args = ?launch.args,
            timeout_ms = elapsed_budget_ms(options.timeout),
            "assistant launched"
        );

        let prompt_path = staged.path().to_path_buf();
        let feeder = tokio::spawn(async move {
            let delivered = async {
                let mut file = tokio::fs::File::open(&prompt_path).await?;
                let bytes = tokio::io::copy(&mut file, &mut stdin).await?;
                stdin.shutdown().await?;
                Ok::<u64, std::io::Error>(bytes)
            }
            .await;
            match delivered {
                Ok(bytes) => debug!(bytes, "prompt delivered, stdin closed"),
                Err(err) => debug!(%err, "prompt delivery ended early"),
            }
        });

        Ok(AssistantRun {
            child: Some(child),
            pid,
            stdout: FramedRead::new(stdout, ChunkCodec::new()),
            stderr: FramedRead::new(stderr, ChunkCodec::new()),
            stdout_open: true,
            stderr_open: true,
            deadline: Some(Box::pin(tokio::time::sleep(options.timeout))),
            budget: options.timeout,
            started: Instant::now(),
            prompt: Some(staged),
            feeder: Some(feeder),
        })
    }

    /// Run the assistant to completion and collect its result.
    ///
    /// Stdout chunks go to the buffer, `options.on_output`, and (when
    /// mirroring is enabled) this process's stdout. Stderr chunks go to the
    /// buffer and this process's stderr only.
    ///
    /// # Errors
    ///
    /// - `AppError::Launch` if the assistant cannot be started.
    /// - `AppError::Timeout` if `options.timeout` elapses first; the process
    ///   is terminated.
    /// - `AppError::Io` if prompt staging or an output stream fails.
    pub async fn invoke(&self, prompt: &str, mut options: InvokeOptions) -> Result<ProcessResult> {
        let span = info_span!(
            "assistant_invoke",
            cli = %self.config.cli,
            resume = options.resume.as_deref().unwrap_or_default(),
        );

        async move {
            let run = self.start(prompt, &options)?;
            let events = run.into_stream();
            tokio::pin!(events);

            let mut buffer = OutputBuffer::default();
            let mut mirror = self.config.mirror_output.then(Mirror::new);
            let mut on_output = options.on_output.take();

            while let Some(event) = events.next().await {
                match event? {
                    RunEvent::Output(chunk) => {
                        buffer.push(&chunk);
                        if let Some(mirror) = mirror.as_mut() {
                            mirror.write(&chunk).await;
                        }
                        if chunk.stream == StreamKind::Stdout {
                            if let Some(sink) = on_output.as_mut() {
                                sink(&chunk.text);
                            }
                        }
                    }
                    RunEvent::Exited(exit) => return Ok(buffer.into_result(exit)),
                }
            }

            Err(AppError::Io(
                "assistant output ended without an exit status".into(),
            ))
        }
        .instrument(span)
        .await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_budget_ms(budget: Duration) -> u64 {
    u64::try_from(budget.as_millis()).unwrap_or(u64::MAX)
}
