//! # cronwheel
//!
//! An in-process job scheduling engine: register jobs and triggers, and a
//! firing loop dispatches executions to a bounded worker pool when their
//! fire times arrive. Supports fixed-interval and cron recurrence (via
//! [`cronwheel_cron`]), exclusion calendars, misfire policies, pause/resume
//! with group semantics, stateful-job serialization, and ordered job /
//! trigger / scheduler listener callbacks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use cronwheel::{
//!     CompletionInstruction, Job, JobDetail, JobExecutionContext, JobKey, JobResult,
//!     Scheduler, SchedulerConfig, Trigger, TriggerKey,
//! };
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Job for Heartbeat {
//!     async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
//!         println!("beat");
//!         Ok(CompletionInstruction::Noop)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (scheduler, factory) = Scheduler::with_default_factory(SchedulerConfig::default());
//!     factory.register("heartbeat", |_| Arc::new(Heartbeat));
//!
//!     let detail = JobDetail::new(JobKey::new("beat"), "heartbeat");
//!     let trigger = Trigger::cron(
//!         TriggerKey::new("beat-every-10s"),
//!         JobKey::new("beat"),
//!         chrono::Utc::now(),
//!         "*/10 * * * * ?",
//!         chrono_tz::Tz::UTC,
//!     )?;
//!     scheduler.schedule_job(detail, trigger).await?;
//!     scheduler.start().await?;
//!     // ... later:
//!     scheduler.shutdown(true).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! A scheduler is created in standby, fires while started, and stops
//! permanently on shutdown. The in-memory registry can outlive a scheduler
//! instance: build with [`Scheduler::with_store`] and hand the same store
//! to a new instance to restart over the registered jobs.

pub mod calendar;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod key;
pub mod listener;
#[cfg(any(test, feature = "test-support"))]
pub mod mocks;
mod run_loop;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use cronwheel_cron::CronExpression;

pub use calendar::{Calendar, HolidayCalendar, WeeklyCalendar};
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use executor::{TokioWorkerPool, WorkerPool, WorkerSlot};
pub use job::{
    CompletionInstruction, Job, JobDataMap, JobDetail, JobExecutionContext, JobExecutionError,
    JobFactory, JobResult, SimpleJobFactory,
};
pub use key::{
    JobKey, TriggerKey, DEFAULT_GROUP, FAILED_OVER_JOBS_GROUP, MANUAL_TRIGGER_GROUP,
    RECOVERING_JOBS_GROUP,
};
pub use listener::{
    JobListener, ListenerError, ListenerResult, SchedulerListener, TriggerListener,
};
pub use scheduler::{Scheduler, SchedulerMetadata, SchedulerState};
pub use store::MemoryStore;
pub use trigger::{MisfireInstruction, RepeatCount, Trigger, TriggerKind, TriggerState};
