//! Subprocess executor for the headless reasoning CLI

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output::parse_output;
use super::{ExecutionRequest, ExecutionResult, Executor, STALE_SESSION_MARKER};
use crate::config::ExecutorConfig;
use crate::session::{Session, SessionStore};

/// How a child process run ended, before classification
#[derive(Debug)]
enum RunOutcome {
    Completed {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Failed(io::Error),
}

/// Invokes the external process once per request
///
/// The child runs in its own process group so a timeout can kill anything it
/// started as well.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
    store: SessionStore,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig, store: SessionStore) -> Self {
        debug!(?config, "CommandExecutor::new: called");
        Self { config, store }
    }

    /// Deadline for a request, scaled by its latency class
    pub fn timeout_for(&self, request: &ExecutionRequest) -> Duration {
        if request.is_long_job(self.config.long_prompt_chars) {
            self.config.long_timeout()
        } else {
            self.config.timeout()
        }
    }

    /// Command-line arguments for a request
    pub fn build_args(&self, request: &ExecutionRequest, session: &Session) -> Vec<String> {
        let mut args = vec!["-p".to_string(), request.prompt.clone()];

        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if request.resume
            && let Some(token) = session.token()
        {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }

        args.push("--output-format".to_string());
        args.push(self.config.output_format.clone());
        args
    }

    async fn run(&self, args: &[String], timeout: Duration) -> RunOutcome {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::Failed(e),
        };
        debug!(pid = ?child.id(), "CommandExecutor::run: spawned");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child).await;
            return RunOutcome::Failed(io::Error::other("child stdio was not captured"));
        };
        let mut group = ProcessGroup::of(&child);

        let deadline = CancellationToken::new();
        let timer = tokio::spawn({
            let deadline = deadline.clone();
            async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            }
        });

        let collected = tokio::select! {
            _ = deadline.cancelled() => None,
            result = collect(&mut child, stdout, stderr) => Some(result),
        };
        timer.abort();

        let outcome = match collected {
            None => {
                terminate(&mut child).await;
                RunOutcome::TimedOut
            }
            Some(Ok((status, stdout, stderr))) => RunOutcome::Completed { status, stdout, stderr },
            Some(Err(e)) => {
                terminate(&mut child).await;
                RunOutcome::Failed(e)
            }
        };
        group.disarm();
        outcome
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, request: &ExecutionRequest, session: &mut Session) -> ExecutionResult {
        let timeout = self.timeout_for(request);
        let args = self.build_args(request, session);
        let resuming = args.iter().any(|a| a == "--resume");
        info!(
            prompt_chars = request.prompt.chars().count(),
            resuming,
            timeout_ms = timeout.as_millis() as u64,
            "Invoking external process"
        );

        let started = Instant::now();
        let outcome = self.run(&args, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            RunOutcome::TimedOut => {
                warn!(elapsed_ms, "External process timed out and was killed");
                ExecutionResult::TimedOut
            }
            RunOutcome::Failed(e) => {
                warn!(binary = ?self.config.binary, error = %e, "Failed to run external process");
                ExecutionResult::ProcessFailed {
                    stderr: format!("Failed to run {}: {}", self.config.binary.display(), e),
                    exit_code: None,
                }
            }
            RunOutcome::Completed { status, stderr, .. } if !status.success() => {
                if stderr.contains(STALE_SESSION_MARKER) {
                    warn!(exit_code = ?status.code(), "Continuity token no longer recognized");
                    return ExecutionResult::StaleSession {
                        stderr: stderr.trim().to_string(),
                    };
                }
                warn!(exit_code = ?status.code(), elapsed_ms, "External process failed");
                ExecutionResult::ProcessFailed {
                    stderr: stderr.trim().to_string(),
                    exit_code: status.code(),
                }
            }
            RunOutcome::Completed { stdout, .. } => {
                let parsed = parse_output(&stdout);
                if !parsed.structured {
                    debug!("External process output was not structured, using raw text");
                }
                if let Some(token) = parsed.session_id {
                    session.update(token);
                    if let Err(e) = self.store.save(session) {
                        warn!(error = %e, "Failed to persist session");
                    }
                }
                info!(elapsed_ms, response_chars = parsed.text.chars().count(), "External process completed");
                ExecutionResult::Success(parsed.text)
            }
        }
    }
}

/// Drain both pipes and reap the child
async fn collect(
    child: &mut Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
) -> io::Result<(ExitStatus, String, String)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let (out_res, err_res, status) = tokio::join!(
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err),
        child.wait()
    );
    out_res?;
    err_res?;
    Ok((
        status?,
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// Kills the child's process group if a run is dropped before the child is reaped
///
/// `kill_on_drop` only reaches the direct child; anything it started shares
/// its process group.
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        let pgid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .filter(|pid| *pid > 0)
            .map(Pid::from_raw);
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(%pgid, "ProcessGroup::drop: killing abandoned process group");
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                debug!(%pgid, error = %e, "ProcessGroup::drop: killpg failed");
            }
        }
    }
}

/// Kill the child's process group and reap the child
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id()
        && let Ok(raw) = i32::try_from(pid)
        && raw > 0
        && let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL)
    {
        debug!(pid, error = %e, "terminate: killpg failed");
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "terminate: kill failed");
    }
}
