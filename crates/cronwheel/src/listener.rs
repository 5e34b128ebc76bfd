//! Listener registration and ordered dispatch.
//!
//! Each listener kind (job, trigger, scheduler) is partitioned into a global
//! list and a named map. Dispatch is awaited in order — globals first, then
//! named — on the firing loop or run shell, so callbacks observe a total
//! order per trigger key. A listener returning an error is logged and does
//! not interrupt the remaining dispatches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::job::{CompletionInstruction, JobExecutionContext, JobExecutionError};
use crate::key::{JobKey, TriggerKey};
use crate::trigger::Trigger;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = std::result::Result<(), ListenerError>;

#[async_trait]
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    async fn job_to_be_executed(&self, _ctx: &JobExecutionContext) -> ListenerResult {
        Ok(())
    }

    async fn job_execution_vetoed(&self, _ctx: &JobExecutionContext) -> ListenerResult {
        Ok(())
    }

    async fn job_was_executed(
        &self,
        _ctx: &JobExecutionContext,
        _error: Option<&JobExecutionError>,
    ) -> ListenerResult {
        Ok(())
    }
}

#[async_trait]
pub trait TriggerListener: Send + Sync {
    fn name(&self) -> &str;

    async fn trigger_fired(
        &self,
        _trigger: &Trigger,
        _ctx: &JobExecutionContext,
    ) -> ListenerResult {
        Ok(())
    }

    /// Return `true` to veto the job execution for this firing. All
    /// listeners are still consulted after a veto.
    async fn veto_job_execution(&self, _trigger: &Trigger, _ctx: &JobExecutionContext) -> bool {
        false
    }

    async fn trigger_misfired(&self, _trigger: &Trigger) -> ListenerResult {
        Ok(())
    }

    async fn trigger_complete(
        &self,
        _trigger: &Trigger,
        _ctx: &JobExecutionContext,
        _instruction: CompletionInstruction,
    ) -> ListenerResult {
        Ok(())
    }
}

#[async_trait]
pub trait SchedulerListener: Send + Sync {
    fn name(&self) -> &str;

    async fn job_scheduled(&self, _trigger: &Trigger) -> ListenerResult {
        Ok(())
    }

    async fn job_unscheduled(&self, _key: &TriggerKey) -> ListenerResult {
        Ok(())
    }

    /// A trigger reached a state from which it will never fire again.
    async fn trigger_finalized(&self, _trigger: &Trigger) -> ListenerResult {
        Ok(())
    }

    async fn trigger_paused(&self, _key: &TriggerKey) -> ListenerResult {
        Ok(())
    }

    async fn trigger_resumed(&self, _key: &TriggerKey) -> ListenerResult {
        Ok(())
    }

    async fn triggers_paused(&self, _group: &str) -> ListenerResult {
        Ok(())
    }

    async fn triggers_resumed(&self, _group: &str) -> ListenerResult {
        Ok(())
    }

    async fn job_paused(&self, _key: &JobKey) -> ListenerResult {
        Ok(())
    }

    async fn job_resumed(&self, _key: &JobKey) -> ListenerResult {
        Ok(())
    }

    async fn jobs_paused(&self, _group: &str) -> ListenerResult {
        Ok(())
    }

    async fn jobs_resumed(&self, _group: &str) -> ListenerResult {
        Ok(())
    }

    async fn scheduler_started(&self) -> ListenerResult {
        Ok(())
    }

    async fn scheduler_in_standby(&self) -> ListenerResult {
        Ok(())
    }

    async fn scheduler_shutdown(&self) -> ListenerResult {
        Ok(())
    }

    /// Internal failure in the firing loop or a run shell; the scheduler
    /// keeps running.
    async fn scheduler_error(&self, _message: &str) -> ListenerResult {
        Ok(())
    }
}

/// Listener storage: one global list and one named map per kind.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    global_job: Vec<Arc<dyn JobListener>>,
    named_job: HashMap<String, Arc<dyn JobListener>>,
    global_trigger: Vec<Arc<dyn TriggerListener>>,
    named_trigger: HashMap<String, Arc<dyn TriggerListener>>,
    global_scheduler: Vec<Arc<dyn SchedulerListener>>,
    named_scheduler: HashMap<String, Arc<dyn SchedulerListener>>,
}

impl ListenerRegistry {
    pub(crate) fn add_global_job_listener(&mut self, l: Arc<dyn JobListener>) {
        self.global_job.push(l);
    }

    pub(crate) fn add_job_listener(&mut self, l: Arc<dyn JobListener>) {
        self.named_job.insert(l.name().to_string(), l);
    }

    pub(crate) fn remove_job_listener(&mut self, name: &str) -> bool {
        let named = self.named_job.remove(name).is_some();
        let before = self.global_job.len();
        self.global_job.retain(|l| l.name() != name);
        named || self.global_job.len() != before
    }

    pub(crate) fn add_global_trigger_listener(&mut self, l: Arc<dyn TriggerListener>) {
        self.global_trigger.push(l);
    }

    pub(crate) fn add_trigger_listener(&mut self, l: Arc<dyn TriggerListener>) {
        self.named_trigger.insert(l.name().to_string(), l);
    }

    pub(crate) fn remove_trigger_listener(&mut self, name: &str) -> bool {
        let named = self.named_trigger.remove(name).is_some();
        let before = self.global_trigger.len();
        self.global_trigger.retain(|l| l.name() != name);
        named || self.global_trigger.len() != before
    }

    pub(crate) fn add_global_scheduler_listener(&mut self, l: Arc<dyn SchedulerListener>) {
        self.global_scheduler.push(l);
    }

    pub(crate) fn add_scheduler_listener(&mut self, l: Arc<dyn SchedulerListener>) {
        self.named_scheduler.insert(l.name().to_string(), l);
    }

    pub(crate) fn remove_scheduler_listener(&mut self, name: &str) -> bool {
        let named = self.named_scheduler.remove(name).is_some();
        let before = self.global_scheduler.len();
        self.global_scheduler.retain(|l| l.name() != name);
        named || self.global_scheduler.len() != before
    }

    /// Dispatch-order snapshot: globals first, then named.
    pub(crate) fn job_listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.global_job
            .iter()
            .cloned()
            .chain(self.named_job.values().cloned())
            .collect()
    }

    pub(crate) fn trigger_listeners(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.global_trigger
            .iter()
            .cloned()
            .chain(self.named_trigger.values().cloned())
            .collect()
    }

    pub(crate) fn scheduler_listeners(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.global_scheduler
            .iter()
            .cloned()
            .chain(self.named_scheduler.values().cloned())
            .collect()
    }
}

/// Notify `trigger_fired` on every listener, then collect vetoes. Returns
/// whether any listener vetoed the execution.
pub(crate) async fn notify_trigger_fired(
    listeners: &[Arc<dyn TriggerListener>],
    trigger: &Trigger,
    ctx: &JobExecutionContext,
) -> bool {
    let mut vetoed = false;
    for l in listeners {
        if let Err(e) = l.trigger_fired(trigger, ctx).await {
            warn!(listener = l.name(), error = %e, "trigger listener failed in trigger_fired");
        }
        if l.veto_job_execution(trigger, ctx).await {
            vetoed = true;
        }
    }
    vetoed
}

pub(crate) async fn notify_trigger_misfired(
    listeners: &[Arc<dyn TriggerListener>],
    trigger: &Trigger,
) {
    for l in listeners {
        if let Err(e) = l.trigger_misfired(trigger).await {
            warn!(listener = l.name(), error = %e, "trigger listener failed in trigger_misfired");
        }
    }
}

pub(crate) async fn notify_trigger_complete(
    listeners: &[Arc<dyn TriggerListener>],
    trigger: &Trigger,
    ctx: &JobExecutionContext,
    instruction: CompletionInstruction,
) {
    for l in listeners {
        if let Err(e) = l.trigger_complete(trigger, ctx, instruction).await {
            warn!(listener = l.name(), error = %e, "trigger listener failed in trigger_complete");
        }
    }
}

pub(crate) async fn notify_job_to_be_executed(
    listeners: &[Arc<dyn JobListener>],
    ctx: &JobExecutionContext,
) {
    for l in listeners {
        if let Err(e) = l.job_to_be_executed(ctx).await {
            warn!(listener = l.name(), error = %e, "job listener failed in job_to_be_executed");
        }
    }
}

pub(crate) async fn notify_job_execution_vetoed(
    listeners: &[Arc<dyn JobListener>],
    ctx: &JobExecutionContext,
) {
    for l in listeners {
        if let Err(e) = l.job_execution_vetoed(ctx).await {
            warn!(listener = l.name(), error = %e, "job listener failed in job_execution_vetoed");
        }
    }
}

pub(crate) async fn notify_job_was_executed(
    listeners: &[Arc<dyn JobListener>],
    ctx: &JobExecutionContext,
    error: Option<&JobExecutionError>,
) {
    for l in listeners {
        if let Err(e) = l.job_was_executed(ctx, error).await {
            warn!(listener = l.name(), error = %e, "job listener failed in job_was_executed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl JobListener for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn job_to_be_executed(&self, _ctx: &JobExecutionContext) -> ListenerResult {
            self.log.lock().push(self.name.clone());
            if self.fail {
                return Err("listener failure".into());
            }
            Ok(())
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn JobListener> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
        })
    }

    fn ctx() -> JobExecutionContext {
        use crate::job::JobDetail;
        use crate::key::JobKey;
        use crate::trigger::Trigger;
        let now = chrono::Utc::now();
        JobExecutionContext {
            fire_instance_id: uuid::Uuid::new_v4(),
            job_detail: Arc::new(JobDetail::new(JobKey::new("j"), "noop")),
            trigger: Trigger::one_shot(TriggerKey::new("t"), JobKey::new("j"), now),
            scheduled_fire_time: now,
            actual_fire_time: now,
            refire_count: 0,
        }
    }

    #[tokio::test]
    async fn globals_dispatch_before_named() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        reg.add_job_listener(recorder("named", &log, false));
        reg.add_global_job_listener(recorder("global", &log, false));

        notify_job_to_be_executed(&reg.job_listeners(), &ctx()).await;

        assert_eq!(*log.lock(), vec!["global".to_string(), "named".to_string()]);
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        reg.add_global_job_listener(recorder("first-fails", &log, true));
        reg.add_global_job_listener(recorder("second", &log, false));

        notify_job_to_be_executed(&reg.job_listeners(), &ctx()).await;

        assert_eq!(log.lock().len(), 2, "both listeners must be notified");
    }

    #[test]
    fn remove_covers_global_and_named() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        reg.add_global_job_listener(recorder("a", &log, false));
        reg.add_job_listener(recorder("b", &log, false));

        assert!(reg.remove_job_listener("a"));
        assert!(reg.remove_job_listener("b"));
        assert!(!reg.remove_job_listener("missing"));
        assert!(reg.job_listeners().is_empty());
    }
}
