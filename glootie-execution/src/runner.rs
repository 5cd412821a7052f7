//! Isolated child-process runner
//!
//! Runs exactly one job per call: stages source into a private scratch
//! directory, spawns the child with stdin closed, captures stdout/stderr
//! into bounded accumulators while emitting coalesced live chunks, enforces
//! the deadline with signal escalation, and removes the scratch directory on
//! every exit path (it is a [`tempfile::TempDir`], bound to the job scope).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::events::{OutputChunk, OutputStream, RunResult};
use crate::language::{launch_plan, CommandStep, Recipe};

/// How long to wait for the stream pumps to drain after the child exits.
/// A grandchild that escaped the process group can hold the pipes open.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Request to run one piece of source text in a child process.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: String,
    pub language: String,
    pub working_dir: PathBuf,
    pub deadline: Duration,
}

/// Best-effort sink for live output chunks. Send failures never affect the
/// job.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl OutputSink {
    pub fn new(tx: mpsc::UnboundedSender<OutputChunk>) -> Self {
        Self { tx }
    }

    fn emit(&self, chunk: OutputChunk) {
        let _ = self.tx.send(chunk);
    }
}

/// In-memory accumulator for one child stream, keeping the tail when the
/// cap is exceeded.
struct StreamBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl StreamBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.limit {
            // keep the most recent half of the cap
            let keep = self.limit / 2;
            let cut = self.buf.len() - keep;
            self.buf.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Outcome of one child invocation (compile or run step).
struct StepOutcome {
    exit_code: i32,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

/// Runs one job at a time in a child process.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: RunnerConfig,
}

impl ScriptRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RunnerConfig::default())
    }

    /// Run the request to completion and resolve with a result shape.
    ///
    /// This never fails: spawn errors, staging errors, unsupported runtimes
    /// and deadline kills all resolve as a `RunResult` with `success=false`.
    pub async fn run(&self, request: &RunRequest, sink: &OutputSink) -> RunResult {
        let started = Instant::now();

        let scratch = match tempfile::Builder::new()
            .prefix(&self.config.scratch_prefix)
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return RunResult::internal_failure(format!(
                    "Failed to create scratch directory: {e}"
                ))
            }
        };

        let Some(plan) = launch_plan(&request.language, &request.source, scratch.path()) else {
            return RunResult::internal_failure(format!(
                "Unsupported runtime: {}",
                request.language
            ));
        };

        for file in &plan.staged {
            let path = scratch.path().join(&file.name);
            if let Err(e) = tokio::fs::write(&path, &file.contents).await {
                return RunResult::internal_failure(format!("Failed to stage {}: {e}", file.name));
            }
        }

        debug!(
            language = %request.language,
            working_dir = %request.working_dir.display(),
            "starting job"
        );

        let outcome = match &plan.recipe {
            Recipe::Run(step) => {
                self.run_step(step, &request.working_dir, request.deadline, sink)
                    .await
            }
            Recipe::CompileThenRun { compile, run } => {
                match self
                    .run_step(compile, &request.working_dir, request.deadline, sink)
                    .await
                {
                    Ok(compiled) if compiled.exit_code == 0 && !compiled.timed_out => {
                        // fresh timer of the same deadline for the run step
                        self.run_step(run, &request.working_dir, request.deadline, sink)
                            .await
                    }
                    other => other,
                }
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(step) => {
                let mut result = RunResult {
                    success: step.exit_code == 0 && !step.timed_out,
                    exit_code: step.exit_code,
                    stdout: step.stdout,
                    stderr: step.stderr,
                    execution_time_ms,
                    error: None,
                    timed_out: step.timed_out,
                };
                if step.timed_out {
                    result.error = Some(format!(
                        "Execution timed out after {}ms",
                        request.deadline.as_millis()
                    ));
                }
                result
            }
            Err(reason) => {
                let mut result = RunResult::internal_failure(reason);
                result.execution_time_ms = execution_time_ms;
                result
            }
        }
        // scratch dropped here: directory removed on every path above
    }

    /// Spawn one step, pump its streams, and enforce the deadline.
    async fn run_step(
        &self,
        step: &CommandStep,
        cwd: &Path,
        deadline: Duration,
        sink: &OutputSink,
    ) -> Result<StepOutcome, String> {
        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {e}", step.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Failed to capture child stdout".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Failed to capture child stderr".to_string())?;

        let out_pump = tokio::spawn(pump_stream(
            stdout,
            OutputStream::Stdout,
            self.config.max_stream_buffer,
            self.config.flush_window,
            sink.clone(),
        ));
        let err_pump = tokio::spawn(pump_stream(
            stderr,
            OutputStream::Stderr,
            self.config.max_stream_buffer,
            self.config.flush_window,
            sink.clone(),
        ));

        let mut timed_out = false;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(deadline) => {
                timed_out = true;
                warn!(program = %step.program, "deadline expired, terminating child");
                terminate(&mut child, self.config.term_grace).await
            }
        };

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(program = %step.program, "wait on child failed: {e}");
                -1
            }
        };

        let stdout = drain_pump(out_pump).await;
        let stderr = drain_pump(err_pump).await;

        debug!(program = %step.program, exit_code, timed_out, "step finished");

        Ok(StepOutcome {
            exit_code,
            timed_out,
            stdout,
            stderr,
        })
    }
}

async fn drain_pump(pump: tokio::task::JoinHandle<StreamBuffer>) -> String {
    let abort = pump.abort_handle();
    match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await {
        Ok(Ok(buf)) => buf.into_string(),
        Ok(Err(e)) => {
            warn!("stream pump task failed: {e}");
            String::new()
        }
        Err(_) => {
            warn!("stream pump did not drain in time");
            abort.abort();
            String::new()
        }
    }
}

/// Read one child stream into a bounded accumulator, emitting coalesced
/// chunks through the sink at most once per flush window.
async fn pump_stream<R>(
    mut reader: R,
    stream: OutputStream,
    limit: usize,
    flush_window: Duration,
    sink: OutputSink,
) -> StreamBuffer
where
    R: AsyncRead + Unpin,
{
    let mut acc = StreamBuffer::new(limit);
    let mut pending: Vec<u8> = Vec::new();
    let mut flush_at: Option<tokio::time::Instant> = None;
    let mut buf = [0u8; 8192];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        acc.push(&buf[..n]);
                        pending.extend_from_slice(&buf[..n]);
                        if flush_at.is_none() {
                            flush_at = Some(tokio::time::Instant::now() + flush_window);
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(tokio::time::Instant::now)),
                if flush_at.is_some() =>
            {
                flush_pending(stream, &mut pending, &sink);
                flush_at = None;
            }
        }
    }

    flush_pending(stream, &mut pending, &sink);
    acc
}

fn flush_pending(stream: OutputStream, pending: &mut Vec<u8>, sink: &OutputSink) {
    if pending.is_empty() {
        return;
    }
    let data = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    sink.emit(OutputChunk::now(stream, data));
}

/// Escalating termination: graceful signal, grace period, unconditional
/// kill. Signals target the child's process group so pipelines die with it.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        // negative pid addresses the process group
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// Windows variant: `taskkill /T` tears down the whole process tree, first
/// politely, then with `/F` after the grace period.
#[cfg(not(unix))]
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T"])
            .output()
            .await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            if let Some(pid) = child.id() {
                let _ = Command::new("taskkill")
                    .args(["/PID", &pid.to_string(), "/T", "/F"])
                    .output()
                    .await;
            }
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// Remove leftover scratch directories from previous runs of the service.
/// Called once at startup, before any job is dispatched.
pub fn purge_stale_scratch(prefix: &str) -> usize {
    let tmp = std::env::temp_dir();
    let Ok(entries) = std::fs::read_dir(&tmp) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(prefix) && entry.path().is_dir() {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => debug!(dir = name, "failed to purge stale scratch: {e}"),
            }
        }
    }

    if removed > 0 {
        debug!(removed, "purged stale scratch directories");
    }
    removed
}
