//! Job definitions, the execution contract, and job instantiation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::key::JobKey;
use crate::trigger::Trigger;

/// Extra data carried by jobs and triggers into each execution.
pub type JobDataMap = HashMap<String, serde_json::Value>;

/// A registered job definition.
///
/// The job-class identifier is opaque to the core; the [`JobFactory`]
/// resolves it to an executable [`Job`] instance at fire time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub job_class: String,
    /// Kept in the registry even when no trigger references it.
    pub durable: bool,
    /// Executions of this job are serialized; concurrent firings block.
    pub stateful: bool,
    /// Excluded from persistent storage by persistence layers.
    pub volatile: bool,
    pub data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey, job_class: impl Into<String>) -> Self {
        Self {
            key,
            job_class: job_class.into(),
            durable: false,
            stateful: false,
            volatile: false,
            data: JobDataMap::new(),
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn volatile(mut self, volatile: bool) -> Self {
        self.volatile = volatile;
        self
    }

    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }
}

/// What the registry should do with the trigger once its job returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionInstruction {
    Noop,
    /// Run the job again immediately with the same context.
    ReExecuteJob,
    /// Remove the fired trigger.
    DeleteTrigger,
    /// Put the fired trigger into the complete state.
    SetTriggerComplete,
    /// Put every trigger of the job into the complete state.
    SetAllJobTriggersComplete,
}

/// Failure raised by a job execution.
#[derive(Debug, Clone)]
pub struct JobExecutionError {
    pub message: String,
}

impl JobExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for JobExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobExecutionError {}

pub type JobResult = std::result::Result<CompletionInstruction, JobExecutionError>;

/// Snapshot handed to a job (and to listeners) for one firing.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    /// Unique per firing; stable across immediate re-executions.
    pub fire_instance_id: Uuid,
    pub job_detail: Arc<JobDetail>,
    pub trigger: Trigger,
    pub scheduled_fire_time: DateTime<Utc>,
    pub actual_fire_time: DateTime<Utc>,
    /// Incremented when the job requests immediate re-execution.
    pub refire_count: u32,
}

/// A unit of work. Implementations are instantiated per firing by the
/// [`JobFactory`].
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> JobResult;

    /// Request that a running execution stop early. Returns `false` when the
    /// job does not support interruption (the default).
    fn interrupt(&self) -> bool {
        false
    }
}

/// Resolves a job-class identifier to an executable instance.
pub trait JobFactory: Send + Sync {
    fn create(&self, detail: &JobDetail) -> Result<Arc<dyn Job>>;
}

type JobConstructor = Arc<dyn Fn(&JobDetail) -> Arc<dyn Job> + Send + Sync>;

/// Factory backed by a map of registered constructors, keyed by job class.
#[derive(Default)]
pub struct SimpleJobFactory {
    constructors: RwLock<HashMap<String, JobConstructor>>,
}

impl SimpleJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, job_class: impl Into<String>, ctor: F)
    where
        F: Fn(&JobDetail) -> Arc<dyn Job> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(job_class.into(), Arc::new(ctor));
    }
}

impl JobFactory for SimpleJobFactory {
    fn create(&self, detail: &JobDetail) -> Result<Arc<dyn Job>> {
        let ctor = self
            .constructors
            .read()
            .get(&detail.job_class)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::ObjectNotFound(format!("job class '{}'", detail.job_class))
            })?;
        Ok(ctor(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
            Ok(CompletionInstruction::Noop)
        }
    }

    #[test]
    fn detail_builder_sets_flags() {
        let detail = JobDetail::new(JobKey::new("j"), "noop")
            .durable(true)
            .stateful(true);
        assert!(detail.durable && detail.stateful && !detail.volatile);
    }

    #[test]
    fn factory_resolves_registered_class() {
        let factory = SimpleJobFactory::new();
        factory.register("noop", |_| Arc::new(NoopJob));
        let detail = JobDetail::new(JobKey::new("j"), "noop");
        assert!(factory.create(&detail).is_ok());
    }

    #[test]
    fn factory_rejects_unknown_class() {
        let factory = SimpleJobFactory::new();
        let detail = JobDetail::new(JobKey::new("j"), "missing");
        let err = match factory.create(&detail) {
            Err(e) => e,
            Ok(_) => panic!("expected create to fail"),
        };
        assert!(matches!(err, SchedulerError::ObjectNotFound(_)));
    }

    #[test]
    fn jobs_are_not_interruptible_by_default() {
        assert!(!NoopJob.interrupt());
    }
}
