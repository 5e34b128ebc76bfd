//! The firing loop and the background misfire scan.
//!
//! One dedicated task drives firing: wait for worker capacity, acquire the
//! next batch of due triggers, sleep until each fire time (waking early on
//! registry changes), then commit the fire and hand the execution to a run
//! shell spawned with a reserved worker slot. Listener dispatch happens at
//! the points the execution lifecycle defines: `trigger_fired` and the veto
//! check on the firing loop, job callbacks and `trigger_complete` on the
//! run shell.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::executor::WorkerSlot;
use crate::job::{CompletionInstruction, Job, JobExecutionContext};
use crate::listener::{
    notify_job_execution_vetoed, notify_job_to_be_executed, notify_job_was_executed,
    notify_trigger_complete, notify_trigger_fired, notify_trigger_misfired,
};
use crate::scheduler::{ExecutingJob, SchedulerInner, SchedulerState};
use crate::store::AcquiredTrigger;
use crate::trigger::TriggerState;

pub(crate) async fn run_firing_loop(inner: Arc<SchedulerInner>) {
    let mut lifecycle = inner.lifecycle.subscribe();
    debug!(scheduler = %inner.name, "firing loop started");

    'main: loop {
        // Standby gate: park until started or shut down.
        loop {
            let state = *lifecycle.borrow_and_update();
            match state {
                SchedulerState::Running => break,
                SchedulerState::Shutdown => break 'main,
                SchedulerState::Standby => {
                    if lifecycle.changed().await.is_err() {
                        break 'main;
                    }
                }
            }
        }

        // Backpressure: block on worker availability before acquisition so
        // acquired triggers are never held waiting for a thread.
        let available = tokio::select! {
            n = inner.pool.wait_for_available() => n,
            _ = lifecycle.changed() => continue 'main,
        };

        let now = Utc::now();
        let window = now + inner.idle_wait();
        let batch = inner.store.acquire_next_triggers(
            now,
            window,
            available.min(inner.config.batch_size),
            inner.misfire_threshold(),
        );

        if !batch.misfired.is_empty() {
            let listeners = inner.trigger_listeners();
            for t in &batch.misfired {
                notify_trigger_misfired(&listeners, t).await;
            }
        }

        if batch.acquired.is_empty() {
            idle_sleep(&inner, &mut lifecycle, now).await;
            continue;
        }

        for acq in batch.acquired {
            if !wait_until_fire_time(&inner, &mut lifecycle, &acq).await
                || *lifecycle.borrow() != SchedulerState::Running
            {
                inner.store.release_acquired(acq.fire_id);
                continue;
            }
            fire_one(&inner, acq).await;
        }
    }
    debug!(scheduler = %inner.name, "firing loop stopped");
}

/// Sleep until the next pending fire time (bounded by the idle wait),
/// waking early on registry changes or lifecycle transitions.
async fn idle_sleep(
    inner: &Arc<SchedulerInner>,
    lifecycle: &mut watch::Receiver<SchedulerState>,
    now: chrono::DateTime<Utc>,
) {
    let dur = match inner.store.next_fire_hint() {
        Some(t) if t > now => (t - now)
            .to_std()
            .unwrap_or(inner.config.idle_wait)
            .min(inner.config.idle_wait),
        // A due trigger that could not be acquired (its stateful job is
        // executing). Completion wakes the loop; the nap only bounds the
        // retry cadence.
        Some(_) => std::time::Duration::from_millis(20),
        None => inner.config.idle_wait,
    };
    tokio::select! {
        _ = tokio::time::sleep(dur) => {}
        _ = inner.wake.notified() => {}
        _ = lifecycle.changed() => {}
    }
}

/// Returns `false` when the fire must be abandoned (trigger removed or the
/// scheduler left the running state).
async fn wait_until_fire_time(
    inner: &Arc<SchedulerInner>,
    lifecycle: &mut watch::Receiver<SchedulerState>,
    acq: &AcquiredTrigger,
) -> bool {
    let now = Utc::now();
    let Ok(delay) = (acq.scheduled_fire_time - now).to_std() else {
        return true;
    };
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = inner.wake.notified() => {
                if inner.store.trigger_state(&acq.key) == TriggerState::None {
                    return false;
                }
            }
            _ = lifecycle.changed() => {
                if *lifecycle.borrow() != SchedulerState::Running {
                    return false;
                }
            }
        }
    }
}

async fn fire_one(inner: &Arc<SchedulerInner>, acq: AcquiredTrigger) {
    let now = Utc::now();
    let Some(bundle) = inner.store.trigger_fired(acq.fire_id, now) else {
        debug!(trigger = %acq.key, "reservation no longer valid, abandoning fire");
        return;
    };
    let ctx = JobExecutionContext {
        fire_instance_id: acq.fire_id,
        job_detail: bundle.job.clone(),
        trigger: bundle.trigger.clone(),
        scheduled_fire_time: bundle.scheduled_fire_time,
        actual_fire_time: bundle.actual_fire_time,
        refire_count: 0,
    };

    let trigger_listeners = inner.trigger_listeners();
    let vetoed = notify_trigger_fired(&trigger_listeners, &bundle.trigger, &ctx).await;
    if vetoed {
        debug!(trigger = %acq.key, "job execution vetoed by trigger listener");
        notify_job_execution_vetoed(&inner.job_listeners(), &ctx).await;
        // Complete listeners run before the store releases the trigger, so
        // completion of fire N is observed before fire N+1.
        notify_trigger_complete(
            &trigger_listeners,
            &bundle.trigger,
            &ctx,
            CompletionInstruction::Noop,
        )
        .await;
        inner
            .store
            .trigger_completed(acq.fire_id, CompletionInstruction::Noop);
        inner.wake.notify_waiters();
        return;
    }

    let job = match inner.factory.create(&bundle.job) {
        Ok(job) => job,
        Err(e) => {
            error!(job = %bundle.job.key, error = %e, "job instantiation failed");
            inner
                .store
                .trigger_completed(acq.fire_id, CompletionInstruction::Noop);
            inner.store.set_trigger_error(&acq.key);
            inner
                .notify_scheduler_error(&format!(
                    "job instantiation failed for '{}': {e}",
                    bundle.job.key
                ))
                .await;
            return;
        }
    };

    let slot = inner.pool.reserve().await;
    inner.executing.lock().insert(
        acq.fire_id,
        ExecutingJob {
            ctx: ctx.clone(),
            job: job.clone(),
        },
    );
    tokio::spawn(run_shell(Arc::clone(inner), job, ctx, slot));
}

/// One job execution: job listeners around the call, immediate re-execution
/// when requested, then trigger completion.
async fn run_shell(
    inner: Arc<SchedulerInner>,
    job: Arc<dyn Job>,
    mut ctx: JobExecutionContext,
    slot: WorkerSlot,
) {
    let fire_id = ctx.fire_instance_id;
    let job_listeners = inner.job_listeners();

    let instruction = loop {
        notify_job_to_be_executed(&job_listeners, &ctx).await;
        let result = job.execute(&ctx).await;
        inner.jobs_executed.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(_) => notify_job_was_executed(&job_listeners, &ctx, None).await,
            Err(e) => {
                warn!(job = %ctx.job_detail.key, error = %e, "job execution failed");
                notify_job_was_executed(&job_listeners, &ctx, Some(e)).await;
                inner
                    .notify_scheduler_error(&format!("job '{}' failed: {e}", ctx.job_detail.key))
                    .await;
            }
        }
        let instruction = result.unwrap_or(CompletionInstruction::Noop);
        if instruction == CompletionInstruction::ReExecuteJob {
            ctx.refire_count += 1;
            continue;
        }
        break instruction;
    };

    // Complete listeners run before the store unblocks the trigger (and any
    // stateful siblings), so completion of fire N is always observed before
    // trigger_fired of fire N+1.
    notify_trigger_complete(&inner.trigger_listeners(), &ctx.trigger, &ctx, instruction).await;
    let effects = inner.store.trigger_completed(fire_id, instruction);
    if let Some(finalized) = effects.finalized {
        for l in inner.scheduler_listeners() {
            if let Err(e) = l.trigger_finalized(&finalized).await {
                warn!(listener = l.name(), error = %e, "scheduler listener failed in trigger_finalized");
            }
        }
    }

    inner.executing.lock().remove(&fire_id);
    drop(slot);
    inner.execution_done.notify_waiters();
    inner.wake.notify_waiters();
}

/// Periodic scan for overdue triggers outside any acquisition window.
pub(crate) async fn run_misfire_loop(inner: Arc<SchedulerInner>) {
    let mut lifecycle = inner.lifecycle.subscribe();
    let mut tick = tokio::time::interval(inner.config.misfire_scan_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let state = *lifecycle.borrow_and_update();
                if state == SchedulerState::Shutdown {
                    break;
                }
                if state != SchedulerState::Running {
                    continue;
                }
                let misfired = inner.store.scan_misfires(Utc::now(), inner.misfire_threshold());
                if !misfired.is_empty() {
                    info!(count = misfired.len(), "misfired triggers rewritten");
                    let listeners = inner.trigger_listeners();
                    for t in &misfired {
                        notify_trigger_misfired(&listeners, t).await;
                    }
                    inner.wake.notify_waiters();
                }
            }
            changed = lifecycle.changed() => {
                if changed.is_err() || *lifecycle.borrow() == SchedulerState::Shutdown {
                    break;
                }
            }
        }
    }
    debug!(scheduler = %inner.name, "misfire scan stopped");
}
