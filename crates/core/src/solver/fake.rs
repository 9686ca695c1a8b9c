//! Scripted solver implementation for testing.

use crate::solver::{Solver, SolverError, SolverRun};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A solver that replays fixed output lines and a fixed exit code.
///
/// Optionally sleeps between lines (to keep a run alive long enough for
/// cancellation and concurrency tests) and writes the output artifact on
/// spawn (to exercise the missing-output failure path when disabled).
#[derive(Clone)]
pub struct FakeSolver {
    lines: Vec<String>,
    exit_code: i32,
    line_delay: Option<Duration>,
    create_output: bool,
    available: bool,
    killed: Arc<AtomicBool>,
}

impl FakeSolver {
    pub fn new(lines: Vec<String>, exit_code: i32) -> Self {
        Self {
            lines,
            exit_code,
            line_delay: None,
            create_output: true,
            available: true,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A solver that reports clean progress to 100% and succeeds.
    pub fn succeeding() -> Self {
        Self::new(
            vec![
                "当前进度: 10 % - 网格划分".to_string(),
                "当前进度: 55 % - 求解中".to_string(),
                "当前进度: 100 % - 完成".to_string(),
            ],
            0,
        )
    }

    /// Sleep this long before each emitted line.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = Some(delay);
        self
    }

    /// Control whether the output artifact is written on spawn.
    pub fn with_output_file(mut self, create: bool) -> Self {
        self.create_output = create;
        self
    }

    pub fn unavailable() -> Self {
        let mut fake = Self::new(Vec::new(), 0);
        fake.available = false;
        fake
    }

    /// Flag set when a spawned run had its process tree killed.
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }
}

#[async_trait]
impl Solver for FakeSolver {
    async fn check_availability(&self) -> bool {
        self.available
    }

    async fn spawn(
        &self,
        _input: &Path,
        output: &Path,
    ) -> Result<Box<dyn SolverRun>, SolverError> {
        if !self.available {
            return Err(SolverError::NotAvailable(
                "fake solver marked unavailable".to_string(),
            ));
        }
        if self.create_output {
            std::fs::write(output, b"fake solver result")?;
        }
        Ok(Box::new(FakeRun {
            remaining: self.lines.clone().into(),
            exit_code: self.exit_code,
            line_delay: self.line_delay,
            run_killed: false,
            any_killed: Arc::clone(&self.killed),
        }))
    }
}

struct FakeRun {
    remaining: VecDeque<String>,
    exit_code: i32,
    line_delay: Option<Duration>,
    run_killed: bool,
    any_killed: Arc<AtomicBool>,
}

#[async_trait]
impl SolverRun for FakeRun {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn next_line(&mut self) -> Option<Result<String, SolverError>> {
        if self.run_killed {
            return None;
        }
        let line = self.remaining.pop_front()?;
        if let Some(delay) = self.line_delay {
            tokio::time::sleep(delay).await;
        }
        Some(Ok(line))
    }

    async fn wait(&mut self) -> Result<i32, SolverError> {
        Ok(self.exit_code)
    }

    async fn kill_tree(&mut self) {
        self.run_killed = true;
        self.remaining.clear();
        self.any_killed.store(true, Ordering::SeqCst);
    }
}
