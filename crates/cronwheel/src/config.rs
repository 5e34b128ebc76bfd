//! Scheduler tuning knobs.

use std::time::Duration;

/// Configuration for a [`Scheduler`](crate::Scheduler) instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Human-readable scheduler name, reported in metadata and logs.
    pub scheduler_name: String,
    /// Number of concurrent job executions.
    pub worker_count: usize,
    /// Maximum triggers acquired per firing-loop pass.
    pub batch_size: usize,
    /// How far ahead the firing loop looks for due triggers, and how long it
    /// sleeps when nothing is pending.
    pub idle_wait: Duration,
    /// A trigger more overdue than this has misfired.
    pub misfire_threshold: Duration,
    /// Cadence of the background misfire scan.
    pub misfire_scan_interval: Duration,
    /// Acquired-but-never-fired reservations older than this are released by
    /// the recovery pass at start.
    pub fired_lease: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "cronwheel".to_string(),
            worker_count: 10,
            batch_size: 8,
            idle_wait: Duration::from_secs(30),
            misfire_threshold: Duration::from_secs(60),
            misfire_scan_interval: Duration::from_secs(60),
            fired_lease: Duration::from_secs(300),
        }
    }
}
