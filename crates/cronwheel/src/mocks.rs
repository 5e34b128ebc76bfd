//! Recording listeners and controllable jobs for tests.
//!
//! Available to downstream crates with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cronwheel = { path = "...", features = ["test-support"] }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::job::{
    CompletionInstruction, Job, JobExecutionContext, JobExecutionError, JobResult,
};
use crate::key::{JobKey, TriggerKey};
use crate::listener::{JobListener, ListenerResult, SchedulerListener, TriggerListener};
use crate::trigger::Trigger;

// ── CountingJob ───────────────────────────────────────────────────────────────

/// Counts its executions; optionally sleeps to simulate work and supports
/// interruption by aborting the sleep.
pub struct CountingJob {
    executions: Arc<AtomicU32>,
    busy_for: Option<std::time::Duration>,
    interrupted: Arc<AtomicBool>,
}

impl CountingJob {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(AtomicU32::new(0)),
            busy_for: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Job that takes `busy_for` per execution.
    pub fn busy(busy_for: std::time::Duration) -> Self {
        Self {
            busy_for: Some(busy_for),
            ..Self::new()
        }
    }

    /// Shared execution counter; clone it before handing the job to a
    /// factory.
    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.executions)
    }

    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

impl Default for CountingJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for CountingJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        if let Some(busy) = self.busy_for {
            // Work until the duration elapses, polling the interrupt flag.
            let interrupted_early = tokio::time::timeout(busy, async {
                while !self.interrupted.load(Ordering::SeqCst) {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            })
            .await
            .is_ok();
            self.executions.fetch_add(1, Ordering::SeqCst);
            if interrupted_early {
                return Err(JobExecutionError::new("interrupted"));
            }
            return Ok(CompletionInstruction::Noop);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionInstruction::Noop)
    }

    fn interrupt(&self) -> bool {
        self.interrupted.store(true, Ordering::SeqCst);
        true
    }
}

/// Always fails with the given message.
pub struct FailingJob {
    pub message: String,
}

#[async_trait]
impl Job for FailingJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        Err(JobExecutionError::new(self.message.clone()))
    }
}

// ── RecordingTriggerListener ──────────────────────────────────────────────────

/// Records trigger lifecycle callbacks; can be configured to veto.
#[derive(Default)]
pub struct RecordingTriggerListener {
    name: String,
    veto: AtomicBool,
    fired: AtomicU32,
    vetoed: AtomicU32,
    misfired: AtomicU32,
    completed: AtomicU32,
    misfired_keys: Mutex<Vec<TriggerKey>>,
}

impl RecordingTriggerListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn veto_next(&self, veto: bool) {
        self.veto.store(veto, Ordering::SeqCst);
    }

    pub fn fired_count(&self) -> u32 {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn vetoed_count(&self) -> u32 {
        self.vetoed.load(Ordering::SeqCst)
    }

    pub fn misfired_count(&self) -> u32 {
        self.misfired.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn misfired_keys(&self) -> Vec<TriggerKey> {
        self.misfired_keys.lock().clone()
    }
}

#[async_trait]
impl TriggerListener for RecordingTriggerListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn trigger_fired(
        &self,
        _trigger: &Trigger,
        _ctx: &JobExecutionContext,
    ) -> ListenerResult {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn veto_job_execution(&self, _trigger: &Trigger, _ctx: &JobExecutionContext) -> bool {
        let veto = self.veto.load(Ordering::SeqCst);
        if veto {
            self.vetoed.fetch_add(1, Ordering::SeqCst);
        }
        veto
    }

    async fn trigger_misfired(&self, trigger: &Trigger) -> ListenerResult {
        self.misfired.fetch_add(1, Ordering::SeqCst);
        self.misfired_keys.lock().push(trigger.key().clone());
        Ok(())
    }

    async fn trigger_complete(
        &self,
        _trigger: &Trigger,
        _ctx: &JobExecutionContext,
        _instruction: CompletionInstruction,
    ) -> ListenerResult {
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── RecordingJobListener ──────────────────────────────────────────────────────

/// Records job lifecycle callbacks in order.
#[derive(Default)]
pub struct RecordingJobListener {
    name: String,
    events: Mutex<Vec<String>>,
}

impl RecordingJobListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl JobListener for RecordingJobListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn job_to_be_executed(&self, ctx: &JobExecutionContext) -> ListenerResult {
        self.events
            .lock()
            .push(format!("to_be_executed:{}", ctx.job_detail.key));
        Ok(())
    }

    async fn job_execution_vetoed(&self, ctx: &JobExecutionContext) -> ListenerResult {
        self.events
            .lock()
            .push(format!("vetoed:{}", ctx.job_detail.key));
        Ok(())
    }

    async fn job_was_executed(
        &self,
        ctx: &JobExecutionContext,
        error: Option<&JobExecutionError>,
    ) -> ListenerResult {
        let suffix = if error.is_some() { ":err" } else { "" };
        self.events
            .lock()
            .push(format!("was_executed:{}{suffix}", ctx.job_detail.key));
        Ok(())
    }
}

// ── RecordingSchedulerListener ────────────────────────────────────────────────

/// Records scheduler lifecycle events as plain strings.
#[derive(Default)]
pub struct RecordingSchedulerListener {
    name: String,
    events: Mutex<Vec<String>>,
}

impl RecordingSchedulerListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

#[async_trait]
impl SchedulerListener for RecordingSchedulerListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn job_scheduled(&self, trigger: &Trigger) -> ListenerResult {
        self.push(format!("scheduled:{}", trigger.key()));
        Ok(())
    }

    async fn job_unscheduled(&self, key: &TriggerKey) -> ListenerResult {
        self.push(format!("unscheduled:{key}"));
        Ok(())
    }

    async fn trigger_finalized(&self, trigger: &Trigger) -> ListenerResult {
        self.push(format!("finalized:{}", trigger.key()));
        Ok(())
    }

    async fn trigger_paused(&self, key: &TriggerKey) -> ListenerResult {
        self.push(format!("paused:{key}"));
        Ok(())
    }

    async fn trigger_resumed(&self, key: &TriggerKey) -> ListenerResult {
        self.push(format!("resumed:{key}"));
        Ok(())
    }

    async fn triggers_paused(&self, group: &str) -> ListenerResult {
        self.push(format!("group_paused:{group}"));
        Ok(())
    }

    async fn triggers_resumed(&self, group: &str) -> ListenerResult {
        self.push(format!("group_resumed:{group}"));
        Ok(())
    }

    async fn job_paused(&self, key: &JobKey) -> ListenerResult {
        self.push(format!("job_paused:{key}"));
        Ok(())
    }

    async fn job_resumed(&self, key: &JobKey) -> ListenerResult {
        self.push(format!("job_resumed:{key}"));
        Ok(())
    }

    async fn jobs_paused(&self, group: &str) -> ListenerResult {
        self.push(format!("jobs_paused:{group}"));
        Ok(())
    }

    async fn jobs_resumed(&self, group: &str) -> ListenerResult {
        self.push(format!("jobs_resumed:{group}"));
        Ok(())
    }

    async fn scheduler_started(&self) -> ListenerResult {
        self.push("started");
        Ok(())
    }

    async fn scheduler_in_standby(&self) -> ListenerResult {
        self.push("standby");
        Ok(())
    }

    async fn scheduler_shutdown(&self) -> ListenerResult {
        self.push("shutdown");
        Ok(())
    }

    async fn scheduler_error(&self, message: &str) -> ListenerResult {
        self.push(format!("error:{message}"));
        Ok(())
    }
}
