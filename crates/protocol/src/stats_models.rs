//! Queue statistics models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host resource utilization percentages, supplied by a collaborator probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceGauges {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// Immutable snapshot of queue depth, activity, and rolling averages.
///
/// Produced periodically by the stats aggregator; never mutated after
/// construction and never written back onto any task.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatsSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Tasks waiting for a slot (pending or queued).
    pub pending_tasks: usize,

    /// Tasks currently holding a slot.
    pub running_tasks: usize,

    /// Tasks completed today (UTC calendar day of their completion).
    pub completed_tasks_today: usize,

    /// Tasks failed today (UTC calendar day of their completion).
    pub failed_tasks_today: usize,

    /// Host CPU utilization, percent.
    pub cpu_usage: f64,

    /// Host memory utilization, percent.
    pub memory_usage: f64,

    /// Host disk utilization, percent.
    pub disk_usage: f64,

    /// Mean queue time in seconds over today's completed tasks that have
    /// one recorded; None when no task qualifies.
    pub avg_queue_time: Option<f64>,

    /// Mean execution time in seconds over today's completed tasks that
    /// have one recorded; None when no task qualifies.
    pub avg_execution_time: Option<f64>,
}
