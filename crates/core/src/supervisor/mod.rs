//! Per-task solver process supervision.
//!
//! A `Supervisor` owns exactly one solver run from spawn to terminal state:
//! it streams the combined output, mirrors every line into the task's log
//! file, drives the high-water-mark progress, and makes the final
//! success/failure call when the process exits. Whatever happens inside —
//! spawn failure, stream I/O error, timeout, cancellation — the task leaves
//! `execute` in a terminal state.

use crate::parser::{self, ProgressSignal};
use crate::solver::{Solver, SolverError, SolverRun};
use crate::state::store::TaskHandle;
use crate::state::task::{
    mark_cancelled, mark_completed, mark_failed, mark_started, update_progress,
};
use chrono::Utc;
use sq_protocol::config_models::EngineConfig;
use sq_protocol::ipc::Event;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::Sender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How one supervised run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The solver exited cleanly and left the expected output artifact.
    Completed { result_filename: String },

    /// The run failed; the task carries the extracted error message.
    Failed { message: String },

    /// The run was cancelled by request before finishing.
    Cancelled,

    /// The run exceeded the configured wall-clock ceiling.
    TimedOut,
}

/// Supervisor-internal failure.
///
/// By the time `execute` returns one of these, the task has already been
/// forced to `failed`; the error is re-signaled for operational visibility.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("log file I/O error: {0}")]
    LogIo(std::io::Error),
}

enum StreamExit {
    Finished,
    Cancelled,
    TimedOut,
    Broken(SolverError),
}

/// Supervises one solver process per `execute` invocation.
pub struct Supervisor {
    solver: Arc<dyn Solver>,
    config: Arc<EngineConfig>,
    events_tx: Sender<Event>,
}

impl Supervisor {
    pub fn new(solver: Arc<dyn Solver>, config: Arc<EngineConfig>, events_tx: Sender<Event>) -> Self {
        Self {
            solver,
            config,
            events_tx,
        }
    }

    /// Run the task's solver process to a terminal state.
    ///
    /// Exactly one terminal transition is guaranteed per invocation: the
    /// happy and failure paths transition inside, and any internal error is
    /// converted into `mark_failed` (with a trailing log annotation) before
    /// being returned to the caller.
    pub async fn execute(
        &self,
        task: TaskHandle,
        cancel: CancellationToken,
    ) -> Result<TerminalOutcome, SupervisorError> {
        let (task_id, log_path) = {
            let mut t = task.lock().await;
            let stem = Path::new(&t.unique_filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| t.unique_filename.clone());
            let log_name = format!("{}_{}.log", stem, Utc::now().format("%Y%m%d_%H%M%S"));
            t.log_filename = Some(log_name.clone());
            (t.id, self.config.logs_dir.join(log_name))
        };

        match self.run(task_id, &task, &log_path, &cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(%task_id, error = %message, "supervisor failed");
                self.annotate_log(&log_path, &format!("\nERROR: {message}\n"))
                    .await;
                let mut t = task.lock().await;
                if let Err(te) = mark_failed(&mut t, message, None, &self.events_tx).await {
                    tracing::debug!(%task_id, error = %te, "task already terminal");
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        task_id: Uuid,
        task: &TaskHandle,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<TerminalOutcome, SupervisorError> {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SupervisorError::LogIo)?;
        }
        let mut log = File::create(log_path).await.map_err(SupervisorError::LogIo)?;

        let (input_path, output_path) = {
            let mut t = task.lock().await;
            if mark_started(&mut t, &self.events_tx).await.is_err() {
                // Cancelled between slot grant and start; nothing ran.
                return Ok(TerminalOutcome::Cancelled);
            }
            (t.input_path.clone(), t.output_path.clone())
        };
        tracing::info!(%task_id, input = %input_path.display(), "starting solver run");

        let mut run = self.solver.spawn(&input_path, &output_path).await?;
        {
            let mut t = task.lock().await;
            t.solver_pid = run.pid();
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.task_timeout_secs);
        let mut output_lines: Vec<String> = Vec::new();

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamExit::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break StreamExit::TimedOut,
                next = run.next_line() => next,
            };
            match next {
                Some(Ok(line)) => {
                    let line = line.trim_end().to_string();
                    log.write_all(line.as_bytes())
                        .await
                        .map_err(SupervisorError::LogIo)?;
                    log.write_all(b"\n").await.map_err(SupervisorError::LogIo)?;
                    // Flushed per line: the log must reflect real progress
                    // even if the process crashes mid-run.
                    log.flush().await.map_err(SupervisorError::LogIo)?;

                    let _ = self
                        .events_tx
                        .send(Event::TaskLogChunk {
                            task_id,
                            content: line.clone(),
                        })
                        .await;

                    match parser::parse_line(&line) {
                        ProgressSignal::Progress { percentage, step } => {
                            self.apply_progress(task, percentage, Some(step)).await;
                        }
                        ProgressSignal::CompletionMarker => {
                            self.apply_progress(task, 100.0, Some("完成".to_string())).await;
                        }
                        ProgressSignal::ErrorMarker { message } => {
                            tracing::warn!(%task_id, %message, "error marker in solver output");
                        }
                        ProgressSignal::None => {}
                    }
                    output_lines.push(line);
                }
                Some(Err(e)) => break StreamExit::Broken(e),
                None => break StreamExit::Finished,
            }
        };

        match exit {
            StreamExit::Cancelled => {
                return Ok(self.settle_cancelled(task_id, task, &mut run, &mut log).await)
            }
            StreamExit::TimedOut => {
                return Ok(self.settle_timed_out(task_id, task, &mut run, &mut log).await)
            }
            StreamExit::Broken(e) => {
                run.kill_tree().await;
                return Err(e.into());
            }
            StreamExit::Finished => {}
        }

        enum WaitExit {
            Cancelled,
            TimedOut,
            Exited(Result<i32, SolverError>),
        }
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitExit::Cancelled,
            _ = tokio::time::sleep_until(deadline) => WaitExit::TimedOut,
            code = run.wait() => WaitExit::Exited(code),
        };
        let exit_code = match waited {
            WaitExit::Cancelled => {
                return Ok(self.settle_cancelled(task_id, task, &mut run, &mut log).await)
            }
            WaitExit::TimedOut => {
                return Ok(self.settle_timed_out(task_id, task, &mut run, &mut log).await)
            }
            WaitExit::Exited(code) => code?,
        };

        let full_output = output_lines.join("\n");

        // A non-zero exit code always fails the run.
        if exit_code != 0 {
            let message = parser::parse_error(&full_output)
                .unwrap_or_else(|| format!("solver process failed with code {exit_code}"));
            self.fail(task, &message, Some(full_output)).await;
            return Ok(TerminalOutcome::Failed { message });
        }

        // A zero exit code is not trusted when the captured output carries
        // known error markers.
        if parser::has_error_markers(&full_output) {
            let message = parser::parse_error(&full_output)
                .unwrap_or_else(|| "solver run completed with errors".to_string());
            self.fail(task, &message, Some(full_output)).await;
            return Ok(TerminalOutcome::Failed { message });
        }

        if !matches!(tokio::fs::try_exists(&output_path).await, Ok(true)) {
            let message = "solver completed but no output file was produced".to_string();
            self.fail(task, &message, Some(full_output)).await;
            return Ok(TerminalOutcome::Failed { message });
        }

        let result_filename = output_filename(&output_path);
        {
            let mut t = task.lock().await;
            if mark_completed(&mut t, result_filename.clone(), &self.events_tx)
                .await
                .is_err()
            {
                // A concurrent cancellation reached the terminal state first.
                return Ok(TerminalOutcome::Cancelled);
            }
        }
        tracing::info!(%task_id, result = %result_filename, "solver run completed");
        Ok(TerminalOutcome::Completed { result_filename })
    }

    async fn apply_progress(&self, task: &TaskHandle, percentage: f64, step: Option<String>) {
        let mut t = task.lock().await;
        if let Err(e) = update_progress(&mut t, percentage, step, &self.events_tx).await {
            tracing::debug!(task_id = %t.id, error = %e, "progress update rejected");
        }
    }

    async fn fail(&self, task: &TaskHandle, message: &str, detail: Option<String>) {
        let mut t = task.lock().await;
        if let Err(e) = mark_failed(&mut t, message.to_string(), detail, &self.events_tx).await {
            tracing::debug!(task_id = %t.id, error = %e, "failure transition rejected");
        }
    }

    async fn settle_cancelled(
        &self,
        task_id: Uuid,
        task: &TaskHandle,
        run: &mut Box<dyn SolverRun>,
        log: &mut File,
    ) -> TerminalOutcome {
        run.kill_tree().await;
        append_best_effort(log, "\nCancelled by user request\n").await;
        // The cancel entry point already settled the state machine; a
        // rejected transition here just means it won the race.
        let mut t = task.lock().await;
        if let Err(e) = mark_cancelled(&mut t, &self.events_tx).await {
            tracing::debug!(%task_id, error = %e, "cancel transition already applied");
        }
        tracing::info!(%task_id, "solver run cancelled");
        TerminalOutcome::Cancelled
    }

    async fn settle_timed_out(
        &self,
        task_id: Uuid,
        task: &TaskHandle,
        run: &mut Box<dyn SolverRun>,
        log: &mut File,
    ) -> TerminalOutcome {
        run.kill_tree().await;
        let note = format!(
            "\nERROR: run exceeded the {}s wall-clock limit\n",
            self.config.task_timeout_secs
        );
        append_best_effort(log, &note).await;
        let mut t = task.lock().await;
        if let Err(e) = mark_cancelled(&mut t, &self.events_tx).await {
            tracing::debug!(%task_id, error = %e, "timeout cancel transition rejected");
        }
        tracing::warn!(%task_id, "solver run timed out");
        TerminalOutcome::TimedOut
    }

    async fn annotate_log(&self, log_path: &Path, text: &str) {
        if let Ok(mut f) = tokio::fs::OpenOptions::new().append(true).open(log_path).await {
            let _ = f.write_all(text.as_bytes()).await;
            let _ = f.flush().await;
        }
    }
}

async fn append_best_effort(log: &mut File, text: &str) {
    let _ = log.write_all(text.as_bytes()).await;
    let _ = log.flush().await;
}

fn output_filename(output_path: &Path) -> String {
    output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| output_path.display().to_string())
}
