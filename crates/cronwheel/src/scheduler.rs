//! The public scheduler facade.
//!
//! A `Scheduler` owns the registry, the firing loop, the misfire scan, and
//! the listener registry. It is created in standby; `start` begins firing,
//! `standby` pauses the loop without touching trigger state, and `shutdown`
//! is terminal — a new instance must be created to schedule again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::executor::{TokioWorkerPool, WorkerPool};
use crate::job::{Job, JobDataMap, JobDetail, JobExecutionContext, JobFactory, SimpleJobFactory};
use crate::key::{JobKey, TriggerKey, MANUAL_TRIGGER_GROUP, RESERVED_GROUPS};
use crate::listener::{
    notify_trigger_misfired, JobListener, ListenerRegistry, SchedulerListener, TriggerListener,
};
use crate::run_loop::{run_firing_loop, run_misfire_loop};
use crate::store::MemoryStore;
use crate::trigger::{Trigger, TriggerState};

/// Lifecycle state of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Standby,
    Running,
    Shutdown,
}

/// Point-in-time snapshot of scheduler identity and counters.
#[derive(Debug, Clone)]
pub struct SchedulerMetadata {
    pub scheduler_name: String,
    pub instance_id: String,
    pub state: SchedulerState,
    pub running_since: Option<DateTime<Utc>>,
    pub jobs_executed: u64,
    pub worker_count: usize,
}

pub(crate) struct ExecutingJob {
    pub(crate) ctx: JobExecutionContext,
    pub(crate) job: Arc<dyn Job>,
}

pub(crate) struct SchedulerInner {
    pub(crate) name: String,
    pub(crate) instance_id: String,
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) factory: Arc<dyn JobFactory>,
    pub(crate) pool: Arc<dyn WorkerPool>,
    pub(crate) listeners: RwLock<ListenerRegistry>,
    pub(crate) lifecycle: watch::Sender<SchedulerState>,
    /// Wakes the firing loop on registry changes.
    pub(crate) wake: Notify,
    pub(crate) executing: Mutex<HashMap<Uuid, ExecutingJob>>,
    /// Signalled whenever an execution finishes; `shutdown(wait)` parks on it.
    pub(crate) execution_done: Notify,
    pub(crate) jobs_executed: AtomicU64,
    pub(crate) running_since: Mutex<Option<DateTime<Utc>>>,
}

impl SchedulerInner {
    pub(crate) fn job_listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.listeners.read().job_listeners()
    }

    pub(crate) fn trigger_listeners(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.listeners.read().trigger_listeners()
    }

    pub(crate) fn scheduler_listeners(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.listeners.read().scheduler_listeners()
    }

    pub(crate) fn misfire_threshold(&self) -> Duration {
        to_chrono(self.config.misfire_threshold)
    }

    pub(crate) fn idle_wait(&self) -> Duration {
        to_chrono(self.config.idle_wait)
    }

    pub(crate) async fn notify_scheduler_error(&self, message: &str) {
        for l in self.scheduler_listeners() {
            if let Err(e) = l.scheduler_error(message).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in scheduler_error");
            }
        }
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::days(3650))
}

/// The scheduler core. Share behind an `Arc` when multiple owners need it;
/// all methods take `&self`.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Scheduler over a fresh in-memory store and an empty job factory.
    ///
    /// Must be called from within a tokio runtime: the firing loop and
    /// misfire scan are spawned immediately and park in standby.
    pub fn new(config: SchedulerConfig, factory: Arc<dyn JobFactory>) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()), factory)
    }

    /// Scheduler over an existing store. Passing the store kept from a
    /// previous (shut down) instance restarts scheduling over the same
    /// registered jobs and triggers.
    pub fn with_store(
        config: SchedulerConfig,
        store: Arc<MemoryStore>,
        factory: Arc<dyn JobFactory>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(SchedulerState::Standby);
        let pool: Arc<dyn WorkerPool> = Arc::new(TokioWorkerPool::new(config.worker_count));
        let inner = Arc::new(SchedulerInner {
            name: config.scheduler_name.clone(),
            instance_id: Uuid::new_v4().to_string(),
            config,
            store,
            factory,
            pool,
            listeners: RwLock::new(ListenerRegistry::default()),
            lifecycle,
            wake: Notify::new(),
            executing: Mutex::new(HashMap::new()),
            execution_done: Notify::new(),
            jobs_executed: AtomicU64::new(0),
            running_since: Mutex::new(None),
        });
        tokio::spawn(run_firing_loop(Arc::clone(&inner)));
        tokio::spawn(run_misfire_loop(Arc::clone(&inner)));
        Self { inner }
    }

    /// Default factory helper for callers that register job constructors
    /// before scheduling.
    pub fn with_default_factory(config: SchedulerConfig) -> (Self, Arc<SimpleJobFactory>) {
        let factory = Arc::new(SimpleJobFactory::new());
        let scheduler = Self::new(config, factory.clone());
        (scheduler, factory)
    }

    // ── identity and lifecycle ────────────────────────────────────────────────

    pub fn scheduler_name(&self) -> &str {
        &self.inner.name
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.lifecycle.borrow()
    }

    pub fn is_in_standby(&self) -> bool {
        self.state() == SchedulerState::Standby
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == SchedulerState::Shutdown
    }

    /// Begin (or resume) firing. Runs the single-node recovery pass first,
    /// releasing trigger reservations stranded by a previous non-clean stop.
    pub async fn start(&self) -> Result<()> {
        self.assert_not_shutdown("start")?;
        let released = self
            .inner
            .store
            .recover_fired(Utc::now(), to_chrono(self.inner.config.fired_lease));
        if released > 0 {
            info!(count = released, "recovered stale trigger reservations");
        }
        {
            let mut since = self.inner.running_since.lock();
            if since.is_none() {
                *since = Some(Utc::now());
            }
        }
        self.inner.lifecycle.send_replace(SchedulerState::Running);
        self.inner.wake.notify_waiters();
        info!(scheduler = %self.inner.name, "scheduler started");
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.scheduler_started().await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in scheduler_started");
            }
        }
        Ok(())
    }

    /// Stop firing without touching trigger states. Triggers that become
    /// due while in standby are subject to misfire handling on restart.
    pub async fn standby(&self) -> Result<()> {
        self.assert_not_shutdown("standby")?;
        self.inner.lifecycle.send_replace(SchedulerState::Standby);
        info!(scheduler = %self.inner.name, "scheduler in standby");
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.scheduler_in_standby().await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in scheduler_in_standby");
            }
        }
        Ok(())
    }

    /// Terminal stop. With `wait_for_jobs`, blocks until in-flight
    /// executions drain; otherwise requests interruption of executing jobs
    /// that support it and returns immediately.
    pub async fn shutdown(&self, wait_for_jobs: bool) -> Result<()> {
        if self.is_shutdown() {
            return Ok(());
        }
        info!(scheduler = %self.inner.name, wait_for_jobs, "scheduler shutting down");
        self.inner.lifecycle.send_replace(SchedulerState::Shutdown);
        self.inner.wake.notify_waiters();

        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.scheduler_shutdown().await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in scheduler_shutdown");
            }
        }

        if wait_for_jobs {
            loop {
                let notified = self.inner.execution_done.notified();
                if self.inner.executing.lock().is_empty() {
                    break;
                }
                notified.await;
            }
        } else {
            let jobs: Vec<Arc<dyn Job>> = self
                .inner
                .executing
                .lock()
                .values()
                .map(|e| e.job.clone())
                .collect();
            for job in jobs {
                let _ = job.interrupt();
            }
        }
        Ok(())
    }

    // ── registration ──────────────────────────────────────────────────────────

    /// Store a job together with its trigger; returns the first fire time.
    pub async fn schedule_job(
        &self,
        detail: JobDetail,
        trigger: Trigger,
    ) -> Result<DateTime<Utc>> {
        self.assert_not_shutdown("schedule_job")?;
        if trigger.job_key() != &detail.key {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "trigger '{}' references job '{}', not '{}'",
                trigger.key(),
                trigger.job_key(),
                detail.key
            )));
        }
        let (trigger, first) = self.prepare_trigger(trigger)?;
        self.inner.store.store_job_and_trigger(detail, trigger.clone())?;
        self.notify_job_scheduled(&trigger).await;
        self.inner.wake.notify_waiters();
        Ok(first)
    }

    /// Schedule a trigger against an already-registered job.
    pub async fn schedule_trigger(&self, trigger: Trigger) -> Result<DateTime<Utc>> {
        self.assert_not_shutdown("schedule_trigger")?;
        let (trigger, first) = self.prepare_trigger(trigger)?;
        self.inner.store.store_trigger(trigger.clone(), false)?;
        self.notify_job_scheduled(&trigger).await;
        self.inner.wake.notify_waiters();
        Ok(first)
    }

    /// Register a job with no trigger. The job must be durable, otherwise
    /// it would be removed immediately as an orphan.
    pub async fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        self.assert_not_shutdown("add_job")?;
        if !detail.key.is_well_formed() {
            return Err(SchedulerError::InvalidConfiguration(
                "job key must have a non-empty name and group".to_string(),
            ));
        }
        if !detail.durable {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "job '{}' has no trigger and must be durable",
                detail.key
            )));
        }
        self.inner.store.store_job(detail, replace)
    }

    /// Remove a job and every trigger referencing it. Each cascade-removed
    /// trigger is reported to scheduler listeners as unscheduled.
    pub async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.assert_not_shutdown("delete_job")?;
        let Some(removed_triggers) = self.inner.store.remove_job(key) else {
            return Ok(false);
        };
        for tk in &removed_triggers {
            self.notify_job_unscheduled(tk).await;
        }
        self.inner.wake.notify_waiters();
        Ok(true)
    }

    /// Remove one trigger; a non-durable job left without triggers is
    /// removed with it.
    pub async fn unschedule_trigger(&self, key: &TriggerKey) -> Result<bool> {
        self.assert_not_shutdown("unschedule_trigger")?;
        let removed = self.inner.store.remove_trigger(key);
        if removed {
            self.notify_job_unscheduled(key).await;
            self.inner.wake.notify_waiters();
        }
        Ok(removed)
    }

    /// Replace a trigger with a new one referencing the same job. Returns
    /// the new first fire time, or `None` when the old trigger was absent.
    pub async fn reschedule_trigger(
        &self,
        key: &TriggerKey,
        new: Trigger,
    ) -> Result<Option<DateTime<Utc>>> {
        self.assert_not_shutdown("reschedule_trigger")?;
        let (new, first) = self.prepare_trigger(new)?;
        if !self.inner.store.replace_trigger(key, new.clone())? {
            return Ok(None);
        }
        self.notify_job_unscheduled(key).await;
        self.notify_job_scheduled(&new).await;
        self.inner.wake.notify_waiters();
        Ok(Some(first))
    }

    /// Fire a job once, immediately, via a transient trigger in the
    /// manual-trigger group. The trigger removes itself on completion.
    pub async fn trigger_job(
        &self,
        key: &JobKey,
        data: Option<JobDataMap>,
        volatile: bool,
    ) -> Result<()> {
        self.assert_not_shutdown("trigger_job")?;
        if !self.inner.store.has_job(key) {
            return Err(SchedulerError::ObjectNotFound(format!("job '{key}'")));
        }
        let name = Uuid::new_v4().to_string();
        let mut trigger = Trigger::one_shot(
            TriggerKey::grouped(name, MANUAL_TRIGGER_GROUP),
            key.clone(),
            Utc::now(),
        )
        .with_volatility(volatile);
        if let Some(data) = data {
            trigger = trigger.with_data(data);
        }
        trigger.set_next_fire_time(trigger.computed_first_fire_time(None));
        self.inner.store.store_trigger(trigger, false)?;
        self.inner.wake.notify_waiters();
        Ok(())
    }

    // ── pause / resume ────────────────────────────────────────────────────────

    pub async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.assert_not_shutdown("pause_trigger")?;
        if !self.inner.store.pause_trigger(key) {
            return Err(SchedulerError::ObjectNotFound(format!("trigger '{key}'")));
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.trigger_paused(key).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in trigger_paused");
            }
        }
        Ok(())
    }

    pub async fn pause_trigger_group(&self, group: &str) -> Result<()> {
        self.assert_not_shutdown("pause_trigger_group")?;
        self.inner.store.pause_trigger_group(group);
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.triggers_paused(group).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in triggers_paused");
            }
        }
        Ok(())
    }

    pub async fn pause_job(&self, key: &JobKey) -> Result<()> {
        self.assert_not_shutdown("pause_job")?;
        if !self.inner.store.pause_job(key) {
            return Err(SchedulerError::ObjectNotFound(format!("job '{key}'")));
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.job_paused(key).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in job_paused");
            }
        }
        Ok(())
    }

    pub async fn pause_job_group(&self, group: &str) -> Result<()> {
        self.assert_not_shutdown("pause_job_group")?;
        self.inner.store.pause_job_group(group);
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.jobs_paused(group).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in jobs_paused");
            }
        }
        Ok(())
    }

    pub async fn pause_all(&self) -> Result<()> {
        self.assert_not_shutdown("pause_all")?;
        let groups = self.inner.store.pause_all();
        for l in self.inner.scheduler_listeners() {
            for group in &groups {
                if let Err(e) = l.triggers_paused(group).await {
                    warn!(listener = l.name(), error = %e, "scheduler listener failed in triggers_paused");
                }
            }
        }
        Ok(())
    }

    pub async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.assert_not_shutdown("resume_trigger")?;
        let (found, misfired) = self.inner.store.resume_trigger(key, Utc::now());
        if !found {
            return Err(SchedulerError::ObjectNotFound(format!("trigger '{key}'")));
        }
        if let Some(t) = misfired {
            notify_trigger_misfired(&self.inner.trigger_listeners(), &t).await;
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.trigger_resumed(key).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in trigger_resumed");
            }
        }
        self.inner.wake.notify_waiters();
        Ok(())
    }

    pub async fn resume_trigger_group(&self, group: &str) -> Result<()> {
        self.assert_not_shutdown("resume_trigger_group")?;
        let (_, misfired) = self.inner.store.resume_trigger_group(group, Utc::now());
        self.notify_misfired_and_resumed(group, misfired).await;
        Ok(())
    }

    pub async fn resume_job(&self, key: &JobKey) -> Result<()> {
        self.assert_not_shutdown("resume_job")?;
        let (found, misfired) = self.inner.store.resume_job(key, Utc::now());
        if !found {
            return Err(SchedulerError::ObjectNotFound(format!("job '{key}'")));
        }
        let listeners = self.inner.trigger_listeners();
        for t in &misfired {
            notify_trigger_misfired(&listeners, t).await;
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.job_resumed(key).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in job_resumed");
            }
        }
        self.inner.wake.notify_waiters();
        Ok(())
    }

    pub async fn resume_job_group(&self, group: &str) -> Result<()> {
        self.assert_not_shutdown("resume_job_group")?;
        let (_, misfired) = self.inner.store.resume_job_group(group, Utc::now());
        let listeners = self.inner.trigger_listeners();
        for t in &misfired {
            notify_trigger_misfired(&listeners, t).await;
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.jobs_resumed(group).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in jobs_resumed");
            }
        }
        self.inner.wake.notify_waiters();
        Ok(())
    }

    pub async fn resume_all(&self) -> Result<()> {
        self.assert_not_shutdown("resume_all")?;
        let (groups, misfired) = self.inner.store.resume_all(Utc::now());
        for group in &groups {
            self.notify_misfired_and_resumed(group, Vec::new()).await;
        }
        let listeners = self.inner.trigger_listeners();
        for t in &misfired {
            notify_trigger_misfired(&listeners, t).await;
        }
        self.inner.wake.notify_waiters();
        Ok(())
    }

    // ── introspection ─────────────────────────────────────────────────────────

    pub fn job_group_names(&self) -> Vec<String> {
        self.inner.store.job_group_names()
    }

    pub fn trigger_group_names(&self) -> Vec<String> {
        self.inner.store.trigger_group_names()
    }

    pub fn paused_trigger_groups(&self) -> Vec<String> {
        self.inner.store.paused_trigger_groups()
    }

    pub fn calendar_names(&self) -> Vec<String> {
        self.inner.store.calendar_names()
    }

    pub fn job_keys(&self, group: &str) -> Vec<JobKey> {
        self.inner.store.job_keys(group)
    }

    pub fn trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        self.inner.store.trigger_keys(group)
    }

    pub fn triggers_of_job(&self, key: &JobKey) -> Vec<Trigger> {
        self.inner.store.triggers_for_job(key)
    }

    pub fn job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        self.inner.store.job(key).map(|j| (*j).clone())
    }

    pub fn trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.inner.store.trigger(key)
    }

    pub fn trigger_state(&self, key: &TriggerKey) -> TriggerState {
        self.inner.store.trigger_state(key)
    }

    /// Snapshots of the executions in flight right now.
    pub fn currently_executing_jobs(&self) -> Vec<JobExecutionContext> {
        self.inner
            .executing
            .lock()
            .values()
            .map(|e| e.ctx.clone())
            .collect()
    }

    pub fn metadata(&self) -> SchedulerMetadata {
        SchedulerMetadata {
            scheduler_name: self.inner.name.clone(),
            instance_id: self.inner.instance_id.clone(),
            state: self.state(),
            running_since: *self.inner.running_since.lock(),
            jobs_executed: self.inner.jobs_executed.load(Ordering::Relaxed),
            worker_count: self.inner.pool.capacity(),
        }
    }

    // ── calendars ─────────────────────────────────────────────────────────────

    pub async fn add_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        self.assert_not_shutdown("add_calendar")?;
        self.inner
            .store
            .store_calendar(name, calendar, replace, update_triggers)?;
        self.inner.wake.notify_waiters();
        Ok(())
    }

    pub async fn delete_calendar(&self, name: &str) -> Result<bool> {
        self.assert_not_shutdown("delete_calendar")?;
        self.inner.store.remove_calendar(name)
    }

    pub fn calendar(&self, name: &str) -> Option<Arc<dyn Calendar>> {
        self.inner.store.calendar(name)
    }

    // ── listeners ─────────────────────────────────────────────────────────────

    pub fn add_global_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.inner.listeners.write().add_global_job_listener(listener);
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.inner.listeners.write().add_job_listener(listener);
    }

    pub fn remove_job_listener(&self, name: &str) -> bool {
        self.inner.listeners.write().remove_job_listener(name)
    }

    pub fn add_global_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.inner
            .listeners
            .write()
            .add_global_trigger_listener(listener);
    }

    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.inner.listeners.write().add_trigger_listener(listener);
    }

    pub fn remove_trigger_listener(&self, name: &str) -> bool {
        self.inner.listeners.write().remove_trigger_listener(name)
    }

    pub fn add_global_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.inner
            .listeners
            .write()
            .add_global_scheduler_listener(listener);
    }

    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.inner.listeners.write().add_scheduler_listener(listener);
    }

    pub fn remove_scheduler_listener(&self, name: &str) -> bool {
        self.inner.listeners.write().remove_scheduler_listener(name)
    }

    // ── interruption ──────────────────────────────────────────────────────────

    /// Request interruption of every running execution of the job. `false`
    /// when the job is not executing; an error when it is executing but no
    /// execution accepted the interrupt.
    pub fn interrupt(&self, key: &JobKey) -> Result<bool> {
        let jobs: Vec<Arc<dyn Job>> = self
            .inner
            .executing
            .lock()
            .values()
            .filter(|e| &e.ctx.job_detail.key == key)
            .map(|e| e.job.clone())
            .collect();
        if jobs.is_empty() {
            return Ok(false);
        }
        let mut interrupted = false;
        for job in jobs {
            if job.interrupt() {
                interrupted = true;
            }
        }
        if interrupted {
            Ok(true)
        } else {
            Err(SchedulerError::UnableToInterruptJob(key.to_string()))
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn assert_not_shutdown(&self, op: &str) -> Result<()> {
        if self.is_shutdown() {
            return Err(SchedulerError::SchedulerState(format!(
                "cannot {op}: scheduler has been shut down"
            )));
        }
        Ok(())
    }

    /// Validate a client trigger and compute its first fire time.
    fn prepare_trigger(&self, mut trigger: Trigger) -> Result<(Trigger, DateTime<Utc>)> {
        if RESERVED_GROUPS.contains(&trigger.key().group()) {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "trigger group '{}' is reserved",
                trigger.key().group()
            )));
        }
        trigger.validate()?;
        let cal = match trigger.calendar_name() {
            Some(name) => Some(self.inner.store.calendar(name).ok_or_else(|| {
                SchedulerError::ObjectNotFound(format!("calendar '{name}'"))
            })?),
            None => None,
        };
        let first = trigger
            .computed_first_fire_time(cal.as_deref())
            .ok_or_else(|| SchedulerError::TriggerDoesNotFire(trigger.key().to_string()))?;
        trigger.set_next_fire_time(Some(first));
        Ok((trigger, first))
    }

    async fn notify_job_scheduled(&self, trigger: &Trigger) {
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.job_scheduled(trigger).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in job_scheduled");
            }
        }
    }

    async fn notify_job_unscheduled(&self, key: &TriggerKey) {
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.job_unscheduled(key).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in job_unscheduled");
            }
        }
    }

    async fn notify_misfired_and_resumed(&self, group: &str, misfired: Vec<Trigger>) {
        let listeners = self.inner.trigger_listeners();
        for t in &misfired {
            notify_trigger_misfired(&listeners, t).await;
        }
        for l in self.inner.scheduler_listeners() {
            if let Err(e) = l.triggers_resumed(group).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in triggers_resumed");
            }
        }
        self.inner.wake.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{CountingJob, RecordingSchedulerListener};
    use crate::trigger::RepeatCount;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            scheduler_name: "test".to_string(),
            ..SchedulerConfig::default()
        }
    }

    fn counting_scheduler() -> (Scheduler, Arc<SimpleJobFactory>) {
        let (scheduler, factory) = Scheduler::with_default_factory(config());
        factory.register("counting", |_| Arc::new(CountingJob::new()));
        (scheduler, factory)
    }

    fn far_future_trigger(name: &str, job: &str) -> Trigger {
        Trigger::simple(
            TriggerKey::new(name),
            JobKey::new(job),
            "2030-01-01T00:00:00Z".parse().unwrap(),
            RepeatCount::Indefinite,
            Duration::minutes(5),
        )
    }

    #[tokio::test]
    async fn starts_in_standby() {
        let (scheduler, _) = counting_scheduler();
        assert!(scheduler.is_in_standby());
        assert!(!scheduler.is_shutdown());
    }

    #[tokio::test]
    async fn schedule_returns_first_fire_time() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        let first = scheduler
            .schedule_job(detail, far_future_trigger("t", "j"))
            .await
            .unwrap();
        let expected: DateTime<Utc> = "2030-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(first, expected);
        assert_eq!(
            scheduler.trigger_state(&TriggerKey::new("t")),
            TriggerState::Normal
        );
    }

    #[tokio::test]
    async fn reserved_group_is_rejected() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        let trigger = Trigger::one_shot(
            TriggerKey::grouped("t", MANUAL_TRIGGER_GROUP),
            JobKey::new("j"),
            Utc::now(),
        );
        let err = scheduler.schedule_job(detail, trigger).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn expired_trigger_does_not_fire_error() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        // A cron trigger whose year set lies entirely in the past has no
        // remaining fire time.
        let past: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let trigger = Trigger::cron(
            TriggerKey::new("t"),
            JobKey::new("j"),
            past,
            "0 0 12 * * ? 2020",
            chrono_tz::Tz::UTC,
        )
        .unwrap();
        let err = scheduler.schedule_job(detail, trigger).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TriggerDoesNotFire(_)));
    }

    #[tokio::test]
    async fn add_job_requires_durability() {
        let (scheduler, _) = counting_scheduler();
        let err = scheduler
            .add_job(JobDetail::new(JobKey::new("j"), "counting"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));

        scheduler
            .add_job(
                JobDetail::new(JobKey::new("j"), "counting").durable(true),
                false,
            )
            .await
            .unwrap();
        assert!(scheduler.job_detail(&JobKey::new("j")).is_some());
    }

    #[tokio::test]
    async fn trigger_job_requires_existing_job() {
        let (scheduler, _) = counting_scheduler();
        let err = scheduler
            .trigger_job(&JobKey::new("missing"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn operations_fail_after_shutdown() {
        let (scheduler, _) = counting_scheduler();
        scheduler.shutdown(false).await.unwrap();
        assert!(scheduler.is_shutdown());

        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerState(_)));
        let err = scheduler
            .add_job(
                JobDetail::new(JobKey::new("j"), "counting").durable(true),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerState(_)));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (scheduler, _) = counting_scheduler();
        scheduler.shutdown(false).await.unwrap();
        scheduler.shutdown(true).await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        scheduler
            .schedule_job(detail, far_future_trigger("t", "j"))
            .await
            .unwrap();

        scheduler.pause_trigger(&TriggerKey::new("t")).await.unwrap();
        assert_eq!(
            scheduler.trigger_state(&TriggerKey::new("t")),
            TriggerState::Paused
        );
        scheduler.resume_trigger(&TriggerKey::new("t")).await.unwrap();
        assert_eq!(
            scheduler.trigger_state(&TriggerKey::new("t")),
            TriggerState::Normal
        );
    }

    #[tokio::test]
    async fn job_pause_and_resume_reach_scheduler_listeners() {
        let (scheduler, _) = counting_scheduler();
        let listener = Arc::new(RecordingSchedulerListener::new("events"));
        scheduler.add_global_scheduler_listener(listener.clone());
        scheduler
            .schedule_job(
                JobDetail::new(JobKey::new("j"), "counting"),
                far_future_trigger("t", "j"),
            )
            .await
            .unwrap();

        scheduler.pause_job(&JobKey::new("j")).await.unwrap();
        scheduler.resume_job(&JobKey::new("j")).await.unwrap();
        scheduler.pause_job_group("DEFAULT").await.unwrap();
        scheduler.resume_job_group("DEFAULT").await.unwrap();

        let events = listener.events();
        for expected in [
            "job_paused:DEFAULT.j",
            "job_resumed:DEFAULT.j",
            "jobs_paused:DEFAULT",
            "jobs_resumed:DEFAULT",
        ] {
            assert!(
                events.iter().any(|e| e == expected),
                "missing {expected} in {events:?}"
            );
        }
    }

    #[tokio::test]
    async fn delete_job_reports_cascade_removed_triggers() {
        let (scheduler, _) = counting_scheduler();
        let listener = Arc::new(RecordingSchedulerListener::new("events"));
        scheduler.add_global_scheduler_listener(listener.clone());
        scheduler
            .schedule_job(
                JobDetail::new(JobKey::new("j"), "counting"),
                far_future_trigger("t1", "j"),
            )
            .await
            .unwrap();
        scheduler
            .schedule_trigger(far_future_trigger("t2", "j"))
            .await
            .unwrap();

        assert!(scheduler.delete_job(&JobKey::new("j")).await.unwrap());
        let events = listener.events();
        assert!(
            events.iter().any(|e| e == "unscheduled:DEFAULT.t1"),
            "t1 removal must be reported: {events:?}"
        );
        assert!(
            events.iter().any(|e| e == "unscheduled:DEFAULT.t2"),
            "t2 removal must be reported: {events:?}"
        );

        assert!(
            !scheduler.delete_job(&JobKey::new("j")).await.unwrap(),
            "second deletion finds nothing"
        );
    }

    #[tokio::test]
    async fn introspection_lists_groups_and_keys() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        scheduler
            .schedule_job(detail, far_future_trigger("t", "j"))
            .await
            .unwrap();

        assert_eq!(scheduler.job_group_names(), vec!["DEFAULT".to_string()]);
        assert_eq!(scheduler.trigger_group_names(), vec!["DEFAULT".to_string()]);
        assert_eq!(scheduler.job_keys("DEFAULT"), vec![JobKey::new("j")]);
        assert_eq!(scheduler.trigger_keys("DEFAULT"), vec![TriggerKey::new("t")]);
        assert_eq!(scheduler.triggers_of_job(&JobKey::new("j")).len(), 1);
    }

    #[tokio::test]
    async fn metadata_reports_identity_and_state() {
        let (scheduler, _) = counting_scheduler();
        let meta = scheduler.metadata();
        assert_eq!(meta.scheduler_name, "test");
        assert_eq!(meta.state, SchedulerState::Standby);
        assert_eq!(meta.jobs_executed, 0);
        assert!(meta.running_since.is_none());

        scheduler.start().await.unwrap();
        let meta = scheduler.metadata();
        assert_eq!(meta.state, SchedulerState::Running);
        assert!(meta.running_since.is_some());
        scheduler.shutdown(false).await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_returns_false_when_not_executing() {
        let (scheduler, _) = counting_scheduler();
        assert!(!scheduler.interrupt(&JobKey::new("idle")).unwrap());
    }

    #[tokio::test]
    async fn reschedule_replaces_and_returns_new_time() {
        let (scheduler, _) = counting_scheduler();
        let detail = JobDetail::new(JobKey::new("j"), "counting");
        scheduler
            .schedule_job(detail, far_future_trigger("t", "j"))
            .await
            .unwrap();

        let later: DateTime<Utc> = "2031-06-01T00:00:00Z".parse().unwrap();
        let replacement = Trigger::one_shot(TriggerKey::new("t"), JobKey::new("j"), later);
        let first = scheduler
            .reschedule_trigger(&TriggerKey::new("t"), replacement)
            .await
            .unwrap();
        assert_eq!(first, Some(later));

        let missing = Trigger::one_shot(TriggerKey::new("ghost"), JobKey::new("j"), later);
        let none = scheduler
            .reschedule_trigger(&TriggerKey::new("ghost"), missing)
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
