//! Real solver adapter spawning the configured external binary.

use crate::solver::{Solver, SolverError, SolverRun};
use async_trait::async_trait;
use sq_protocol::config_models::EngineConfig;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};

type LineStream = Pin<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send>>;

/// Adapter for the real solver binary.
///
/// The command line is built from the configured executable and argument
/// template; the literal placeholders `{input}` and `{output}` are
/// substituted with the task's artifact paths at spawn time.
pub struct CommandSolver {
    executable: PathBuf,
    args_template: Vec<String>,
}

impl CommandSolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            executable: config.solver_executable.clone(),
            args_template: config.solver_args.clone(),
        }
    }

    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        self.args_template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect()
    }
}

#[async_trait]
impl Solver for CommandSolver {
    async fn check_availability(&self) -> bool {
        which::which(&self.executable).is_ok()
    }

    async fn spawn(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<Box<dyn SolverRun>, SolverError> {
        let args = self.build_args(input, output);

        let mut cmd = Command::new(&self.executable);
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        // Own process group, so cancellation can signal the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            SolverError::SpawnFailed(format!("'{}': {}", self.executable.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolverError::SpawnFailed("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SolverError::SpawnFailed("failed to capture stderr".to_string()))?;

        // Interleave both pipes into one combined stream, in arrival order.
        let stdout_lines = LinesStream::new(BufReader::new(stdout).lines());
        let stderr_lines = LinesStream::new(BufReader::new(stderr).lines());
        let lines: LineStream = Box::pin(stdout_lines.merge(stderr_lines));

        let pid = child.id();
        Ok(Box::new(CommandRun { child, lines, pid }))
    }
}

struct CommandRun {
    child: Child,
    lines: LineStream,
    pid: Option<u32>,
}

#[async_trait]
impl SolverRun for CommandRun {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn next_line(&mut self) -> Option<Result<String, SolverError>> {
        self.lines
            .next()
            .await
            .map(|r| r.map_err(SolverError::Stream))
    }

    async fn wait(&mut self) -> Result<i32, SolverError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill_tree(&mut self) {
        // Signal the whole process group first, descendants included.
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // Safety: plain signal send, no memory is touched.
            let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
            if rc != 0 {
                tracing::warn!(pid, "failed to signal solver process group");
            }
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = ?self.pid, error = %e, "failed to kill solver process");
        }
    }
}
