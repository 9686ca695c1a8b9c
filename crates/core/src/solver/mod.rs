//! Solver process abstraction.
//!
//! The external simulation binary is modeled as a narrow capability: spawn
//! it against an input/output path pair and get back a handle exposing the
//! combined output stream, the exit code, and best-effort termination. The
//! supervisor only ever talks to this seam, so a scripted fake can stand in
//! for the real binary in tests without touching any parsing or state
//! logic.

pub mod command;
pub mod fake;

pub use command::CommandSolver;
pub use fake::FakeSolver;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors from spawning or driving the solver process.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Solver not available: {0}")]
    NotAvailable(String),
    #[error("Failed to spawn solver: {0}")]
    SpawnFailed(String),
    #[error("Solver stream error: {0}")]
    Stream(#[from] std::io::Error),
}

/// One spawned solver process.
///
/// Lines arrive in the exact order the process emitted them; `wait`
/// yields the exit code once the stream is exhausted.
#[async_trait]
pub trait SolverRun: Send {
    /// OS process id, when one exists.
    fn pid(&self) -> Option<u32>;

    /// Next line of combined output, or `None` at end of stream.
    async fn next_line(&mut self) -> Option<Result<String, SolverError>>;

    /// Wait for the process to exit and return its exit code.
    async fn wait(&mut self) -> Result<i32, SolverError>;

    /// Terminate the process and its descendants, best-effort.
    ///
    /// Failure to kill is logged by implementations, never propagated:
    /// freeing the slot and settling task state must still succeed.
    async fn kill_tree(&mut self);
}

/// The opaque solver binary capability.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Whether the solver can be invoked at all on this host.
    async fn check_availability(&self) -> bool;

    /// Spawn one run against the given artifact paths.
    async fn spawn(&self, input: &Path, output: &Path)
        -> Result<Box<dyn SolverRun>, SolverError>;
}
