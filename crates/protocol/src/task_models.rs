//! Simulation task record and status models.
//!
//! This module defines the structures for tracking one simulation job from
//! submission through its terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Represents the current lifecycle status of a simulation task.
///
/// The status progresses through these states during normal execution:
/// Pending -> Queued -> Running -> Completed
///
/// Terminal states:
/// - Completed: the solver produced a result artifact
/// - Failed: the solver failed, or its output contained error markers
/// - Cancelled: stopped by user request or by the wall-clock timeout
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been created but holds no execution slot yet.
    Pending,

    /// Task has been granted a slot and is about to start.
    Queued,

    /// The solver process is actively executing.
    Running,

    /// The solver finished and left a result artifact.
    Completed,

    /// The run failed; `error_message` carries the extracted reason.
    Failed,

    /// The task was cancelled before reaching a natural end.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status permits no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Scheduling priority of a task.
///
/// High-priority tasks are always dispatched before normal ones; within one
/// tier, dispatch order is strict FIFO by arrival.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Represents one request to run the solver against one input artifact.
///
/// A Task is created in `Pending` state when a submission arrives. The
/// dispatcher and the supervising engine are the only writers afterwards;
/// every status change goes through the transition functions in
/// `sq-core::state::task`, which also maintain the timestamp and duration
/// fields as transition side effects.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: Uuid,

    /// Owning user. Back-reference only; the engine never mutates it.
    pub user_id: Uuid,

    /// Filename as the user submitted it, for display.
    pub original_filename: String,

    /// Collision-free filename the input artifact was stored under.
    ///
    /// Also seeds the fallback result-file naming pattern used during
    /// cleanup when a task failed before a result was recorded.
    pub unique_filename: String,

    /// Path of the input artifact on disk.
    pub input_path: PathBuf,

    /// Path the solver is expected to leave the result artifact at.
    ///
    /// Computed at submission; the file does not exist until success.
    pub output_path: PathBuf,

    /// Scheduling priority.
    pub priority: Priority,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// High-water-mark progress percentage, 0.0 to 100.0.
    ///
    /// Monotonically non-decreasing while running; forced to 100.0 on
    /// completion. Lower or duplicate readings are dropped so out-of-order
    /// output chunks never make the displayed progress regress.
    pub progress_percentage: f64,

    /// Free-text label of the solver's current step, when one was parsed.
    pub current_step: Option<String>,

    /// OS process id of the solver, present only while running.
    pub solver_pid: Option<u32>,

    /// Name of the per-task log file under the logs directory.
    pub log_filename: Option<String>,

    /// Name of the result artifact, recorded on completion.
    pub result_filename: Option<String>,

    /// Human-readable failure reason, present only on `Failed`.
    pub error_message: Option<String>,

    /// Raw captured output retained for failure diagnosis.
    pub error_log: Option<String>,

    /// When the task record was created.
    pub created_at: DateTime<Utc>,

    /// When the task was granted an execution slot. Set at most once.
    pub queued_at: Option<DateTime<Utc>>,

    /// When the solver process was started. Set at most once.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state. Set at most once.
    pub completed_at: Option<DateTime<Utc>>,

    /// Seconds between creation and slot grant; None until queued.
    pub queue_time: Option<f64>,

    /// Seconds between start and terminal state; None until both exist.
    pub execution_time: Option<f64>,
}

impl Task {
    /// Create a new Task in `Pending` state with a fresh id.
    pub fn new(
        user_id: Uuid,
        original_filename: String,
        unique_filename: String,
        input_path: PathBuf,
        output_path: PathBuf,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            original_filename,
            unique_filename,
            input_path,
            output_path,
            priority,
            status: TaskStatus::Pending,
            progress_percentage: 0.0,
            current_step: None,
            solver_pid: None,
            log_filename: None,
            result_filename: None,
            error_message: None,
            error_log: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            queue_time: None,
            execution_time: None,
        }
    }

    /// Whether the task currently holds or awaits an execution slot.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::Running)
    }

    /// Whether the task has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a cancellation request would be accepted.
    ///
    /// Only non-terminal tasks can be cancelled.
    pub fn can_be_cancelled(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Running
        )
    }
}
