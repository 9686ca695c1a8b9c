//! Engine configuration models.
//!
//! This module defines the structure of the engine configuration document
//! that controls solver invocation, queue limits, and artifact directories.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine settings, normally loaded from a YAML document.
///
/// Every field carries a default so a partial (or absent) document yields a
/// usable configuration.
///
/// # Example
///
/// ```yaml
/// solver_executable: /opt/solver/bin/solverbatch
/// solver_args: ["-inputfile", "{input}", "-outputfile", "{output}"]
/// max_concurrent_tasks: 2
/// task_timeout_secs: 3600
/// results_dir: /data/results
/// logs_dir: /data/logs
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Path of the external solver binary.
    #[serde(default = "default_solver_executable")]
    pub solver_executable: PathBuf,

    /// Argument template for the solver invocation.
    ///
    /// The literal placeholders `{input}` and `{output}` are substituted
    /// with the task's artifact paths at spawn time.
    #[serde(default = "default_solver_args")]
    pub solver_args: Vec<String>,

    /// Maximum number of solver processes allowed to run simultaneously.
    ///
    /// The solver is heavyweight and licensed per concurrent run, so this
    /// stays a small integer.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Wall-clock ceiling per task, in seconds.
    ///
    /// A run exceeding it follows the cancellation path.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Directory result artifacts are written into.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Directory per-task log files are written into.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Suffix appended to an input's stem to form the fallback result name.
    #[serde(default = "default_result_suffix")]
    pub result_suffix: String,
}

fn default_solver_executable() -> PathBuf {
    PathBuf::from("solverbatch")
}

fn default_solver_args() -> Vec<String> {
    vec![
        "-inputfile".to_string(),
        "{input}".to_string(),
        "-outputfile".to_string(),
        "{output}".to_string(),
    ]
}

fn default_max_concurrent_tasks() -> usize {
    2
}

fn default_task_timeout_secs() -> u64 {
    3600
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_result_suffix() -> String {
    "_solved".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            solver_executable: default_solver_executable(),
            solver_args: default_solver_args(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_secs: default_task_timeout_secs(),
            results_dir: default_results_dir(),
            logs_dir: default_logs_dir(),
            result_suffix: default_result_suffix(),
        }
    }
}
