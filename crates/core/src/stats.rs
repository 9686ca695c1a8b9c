//! Queue statistics aggregation.
//!
//! Periodically (externally triggered) condenses the task registry and the
//! host resource gauges into an immutable snapshot. Reads only; never
//! mutates a task.

use crate::state::store::TaskStore;
use chrono::Utc;
use sq_protocol::stats_models::{ResourceGauges, StatsSnapshot};
use sq_protocol::task_models::{Task, TaskStatus};
use std::sync::Arc;

/// Source of host utilization gauges.
///
/// The gauges are supplied by a collaborator (the engine does not probe
/// the host itself), so the seam is a trait the embedding service
/// implements; tests plug in a fixed probe.
pub trait ResourceProbe: Send + Sync {
    fn gauges(&self) -> ResourceGauges;
}

/// A probe returning constant gauges. Default stand-in when the embedding
/// service supplies no host metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub ResourceGauges);

impl ResourceProbe for StaticProbe {
    fn gauges(&self) -> ResourceGauges {
        self.0
    }
}

/// Computes point-in-time statistics over the task registry.
pub struct StatsAggregator {
    store: TaskStore,
    probe: Arc<dyn ResourceProbe>,
}

impl StatsAggregator {
    pub fn new(store: TaskStore, probe: Arc<dyn ResourceProbe>) -> Self {
        Self { store, probe }
    }

    /// Take one snapshot of queue depth, activity, and rolling averages.
    ///
    /// "Today" is the current UTC calendar day of a task's completion
    /// timestamp. Tasks missing a `queue_time` or `execution_time` are
    /// excluded from that specific average rather than counted as zero.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let tasks = self.store.all().await;
        let now = Utc::now();
        let today = now.date_naive();

        let finished_today = |t: &&Task, status: TaskStatus| {
            t.status == status
                && t.completed_at
                    .map(|c| c.date_naive() == today)
                    .unwrap_or(false)
        };

        let pending_tasks = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Queued))
            .count();
        let running_tasks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();
        let completed_today: Vec<&Task> = tasks
            .iter()
            .filter(|t| finished_today(t, TaskStatus::Completed))
            .collect();
        let failed_tasks_today = tasks
            .iter()
            .filter(|t| finished_today(t, TaskStatus::Failed))
            .count();

        let avg_queue_time = mean(completed_today.iter().filter_map(|t| t.queue_time));
        let avg_execution_time = mean(completed_today.iter().filter_map(|t| t.execution_time));

        let gauges = self.probe.gauges();

        StatsSnapshot {
            timestamp: now,
            pending_tasks,
            running_tasks,
            completed_tasks_today: completed_today.len(),
            failed_tasks_today,
            cpu_usage: gauges.cpu_usage,
            memory_usage: gauges.memory_usage,
            disk_usage: gauges.disk_usage,
            avg_queue_time,
            avg_execution_time,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}
