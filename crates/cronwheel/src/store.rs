//! In-memory registry of jobs, triggers and calendars.
//!
//! One reader-writer lock guards the whole structure. Stored values are
//! never mutated in place: every update clones, rewrites, and replaces, so
//! everything handed out of the store is a snapshot. Acquisition is the
//! serialization point between the firing loop and client mutations — a
//! trigger transitions to an acquired state atomically with leaving the
//! time-ordered queue, making it invisible to other acquirers.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{Result, SchedulerError};
use crate::job::{CompletionInstruction, JobDetail};
use crate::key::{JobKey, TriggerKey, MANUAL_TRIGGER_GROUP};
use crate::trigger::{MisfireInstruction, Trigger, TriggerState};

/// Internal record state; the externally visible [`TriggerState`] folds
/// `Acquired` into `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Waiting,
    Paused,
    Acquired,
    Blocked,
    PausedBlocked,
    Complete,
    Error,
}

#[derive(Clone)]
struct TriggerRecord {
    trigger: Trigger,
    state: RecordState,
}

/// Queue ordering: earliest fire time first, then priority descending, then
/// key for determinism.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    time: DateTime<Utc>,
    priority: Reverse<i32>,
    key: TriggerKey,
}

impl QueueKey {
    fn of(trigger: &Trigger) -> Option<Self> {
        trigger.next_fire_time().map(|time| Self {
            time,
            priority: Reverse(trigger.priority()),
            key: trigger.key().clone(),
        })
    }
}

/// Reservation of one trigger for one firing pass.
struct FiredRecord {
    trigger_key: TriggerKey,
    job_key: JobKey,
    scheduled_fire_time: DateTime<Utc>,
    acquired_at: DateTime<Utc>,
    /// Set once `trigger_fired` ran; fired records are past the point of
    /// lease-based recovery.
    fired: bool,
}

/// A trigger handed to the firing loop by acquisition.
pub(crate) struct AcquiredTrigger {
    pub fire_id: Uuid,
    pub key: TriggerKey,
    pub scheduled_fire_time: DateTime<Utc>,
}

pub(crate) struct AcquireOutcome {
    pub acquired: Vec<AcquiredTrigger>,
    /// Triggers rewritten by their misfire instruction during this pass.
    pub misfired: Vec<Trigger>,
}

/// Everything the run shell needs for one execution.
pub(crate) struct FiredBundle {
    pub job: Arc<JobDetail>,
    pub trigger: Trigger,
    pub scheduled_fire_time: DateTime<Utc>,
    pub actual_fire_time: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct CompletionEffects {
    /// Snapshot of a trigger that will never fire again.
    pub finalized: Option<Trigger>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, Arc<JobDetail>>,
    triggers: HashMap<TriggerKey, TriggerRecord>,
    queue: BTreeSet<QueueKey>,
    paused_trigger_groups: HashSet<String>,
    paused_job_groups: HashSet<String>,
    /// Set by `pause_all`: groups created afterwards also start paused.
    all_paused: bool,
    blocked_jobs: HashSet<JobKey>,
    calendars: HashMap<String, Arc<dyn Calendar>>,
    fired: HashMap<Uuid, FiredRecord>,
}

/// The in-memory job store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── jobs ──────────────────────────────────────────────────────────────────

    pub(crate) fn store_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.jobs.contains_key(&detail.key) && !replace {
            return Err(SchedulerError::ObjectAlreadyExists(format!(
                "job '{}'",
                detail.key
            )));
        }
        inner.jobs.insert(detail.key.clone(), Arc::new(detail));
        Ok(())
    }

    /// Store a job and its trigger under one lock acquisition, so no
    /// observer sees the job without its trigger.
    pub(crate) fn store_job_and_trigger(&self, detail: JobDetail, trigger: Trigger) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.jobs.contains_key(&detail.key) {
            return Err(SchedulerError::ObjectAlreadyExists(format!(
                "job '{}'",
                detail.key
            )));
        }
        if inner.triggers.contains_key(trigger.key()) {
            return Err(SchedulerError::ObjectAlreadyExists(format!(
                "trigger '{}'",
                trigger.key()
            )));
        }
        inner.jobs.insert(detail.key.clone(), Arc::new(detail));
        inner.insert_trigger_record(trigger);
        Ok(())
    }

    /// Remove a job and every trigger referencing it. Returns the keys of
    /// the cascade-removed triggers, or `None` when the job was absent.
    pub(crate) fn remove_job(&self, key: &JobKey) -> Option<Vec<TriggerKey>> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let trigger_keys = inner.job_trigger_keys(key);
        for tk in &trigger_keys {
            inner.detach_trigger_record(tk);
            inner.triggers.remove(tk);
        }
        inner.blocked_jobs.remove(key);
        if inner.jobs.remove(key).is_some() {
            Some(trigger_keys)
        } else {
            None
        }
    }

    pub(crate) fn job(&self, key: &JobKey) -> Option<Arc<JobDetail>> {
        self.inner.read().jobs.get(key).cloned()
    }

    pub(crate) fn has_job(&self, key: &JobKey) -> bool {
        self.inner.read().jobs.contains_key(key)
    }

    // ── triggers ──────────────────────────────────────────────────────────────

    pub(crate) fn store_trigger(&self, trigger: Trigger, replace: bool) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if !inner.jobs.contains_key(trigger.job_key()) {
            return Err(SchedulerError::ObjectNotFound(format!(
                "job '{}' referenced by trigger '{}'",
                trigger.job_key(),
                trigger.key()
            )));
        }
        if inner.triggers.contains_key(trigger.key()) {
            if !replace {
                return Err(SchedulerError::ObjectAlreadyExists(format!(
                    "trigger '{}'",
                    trigger.key()
                )));
            }
            inner.detach_trigger_record(trigger.key());
        }
        inner.insert_trigger_record(trigger);
        Ok(())
    }

    pub(crate) fn remove_trigger(&self, key: &TriggerKey) -> bool {
        self.inner.write().remove_trigger_record(key)
    }

    /// Atomic swap; the new trigger must reference the same job.
    pub(crate) fn replace_trigger(&self, key: &TriggerKey, new: Trigger) -> Result<bool> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let same_job = match inner.triggers.get(key) {
            None => return Ok(false),
            Some(old) => old.trigger.job_key() == new.job_key(),
        };
        if !same_job {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "replacement for trigger '{key}' must reference the same job"
            )));
        }
        inner.detach_trigger_record(key);
        inner.triggers.remove(key);
        inner.insert_trigger_record(new);
        Ok(true)
    }

    pub(crate) fn trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.inner
            .read()
            .triggers
            .get(key)
            .map(|r| r.trigger.clone())
    }

    pub(crate) fn trigger_state(&self, key: &TriggerKey) -> TriggerState {
        match self.inner.read().triggers.get(key).map(|r| r.state) {
            None => TriggerState::None,
            Some(RecordState::Waiting) | Some(RecordState::Acquired) => TriggerState::Normal,
            Some(RecordState::Paused) => TriggerState::Paused,
            Some(RecordState::Blocked) => TriggerState::Blocked,
            Some(RecordState::PausedBlocked) => TriggerState::PausedBlocked,
            Some(RecordState::Complete) => TriggerState::Complete,
            Some(RecordState::Error) => TriggerState::Error,
        }
    }

    pub(crate) fn set_trigger_error(&self, key: &TriggerKey) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.detach_trigger_record(key);
        if let Some(rec) = inner.triggers.get_mut(key) {
            rec.state = RecordState::Error;
        }
    }

    pub(crate) fn triggers_for_job(&self, key: &JobKey) -> Vec<Trigger> {
        let inner = self.inner.read();
        let mut out: Vec<Trigger> = inner
            .triggers
            .values()
            .filter(|r| r.trigger.job_key() == key)
            .map(|r| r.trigger.clone())
            .collect();
        out.sort_by(|a, b| a.key().cmp(b.key()));
        out
    }

    // ── introspection ─────────────────────────────────────────────────────────

    pub(crate) fn job_group_names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let set: BTreeSet<String> = inner.jobs.keys().map(|k| k.group().to_string()).collect();
        set.into_iter().collect()
    }

    pub(crate) fn trigger_group_names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let set: BTreeSet<String> = inner
            .triggers
            .keys()
            .map(|k| k.group().to_string())
            .collect();
        set.into_iter().collect()
    }

    pub(crate) fn job_keys(&self, group: &str) -> Vec<JobKey> {
        let inner = self.inner.read();
        let mut out: Vec<JobKey> = inner
            .jobs
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub(crate) fn trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        let inner = self.inner.read();
        let mut out: Vec<TriggerKey> = inner
            .triggers
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub(crate) fn paused_trigger_groups(&self) -> Vec<String> {
        let inner = self.inner.read();
        let set: BTreeSet<String> = inner.paused_trigger_groups.iter().cloned().collect();
        set.into_iter().collect()
    }

    pub(crate) fn next_fire_hint(&self) -> Option<DateTime<Utc>> {
        self.inner.read().queue.first().map(|qk| qk.time)
    }

    // ── calendars ─────────────────────────────────────────────────────────────

    pub(crate) fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.calendars.contains_key(name) && !replace {
            return Err(SchedulerError::ObjectAlreadyExists(format!(
                "calendar '{name}'"
            )));
        }
        inner.calendars.insert(name.to_string(), calendar.clone());
        if update_triggers {
            let keys: Vec<TriggerKey> = inner
                .triggers
                .iter()
                .filter(|(_, r)| r.trigger.calendar_name() == Some(name))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                inner.detach_trigger_record(&key);
                let mut completed = false;
                if let Some(rec) = inner.triggers.get_mut(&key) {
                    rec.trigger.update_with_new_calendar(Some(calendar.as_ref()));
                    completed = rec.trigger.next_fire_time().is_none();
                    if completed {
                        rec.state = RecordState::Complete;
                    }
                }
                if !completed {
                    inner.attach_trigger_record(&key);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn remove_calendar(&self, name: &str) -> Result<bool> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let referenced = inner
            .triggers
            .values()
            .any(|r| r.trigger.calendar_name() == Some(name));
        if referenced {
            return Err(SchedulerError::JobPersistence(format!(
                "calendar '{name}' is referenced by triggers and cannot be removed"
            )));
        }
        Ok(inner.calendars.remove(name).is_some())
    }

    pub(crate) fn calendar(&self, name: &str) -> Option<Arc<dyn Calendar>> {
        self.inner.read().calendars.get(name).cloned()
    }

    pub(crate) fn calendar_names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let set: BTreeSet<String> = inner.calendars.keys().cloned().collect();
        set.into_iter().collect()
    }

    // ── pause / resume ────────────────────────────────────────────────────────

    pub(crate) fn pause_trigger(&self, key: &TriggerKey) -> bool {
        self.inner.write().pause_record(key)
    }

    pub(crate) fn pause_trigger_group(&self, group: &str) -> Vec<TriggerKey> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.paused_trigger_groups.insert(group.to_string());
        let keys: Vec<TriggerKey> = inner
            .triggers
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        let mut paused = Vec::new();
        for key in keys {
            if inner.pause_record(&key) {
                paused.push(key);
            }
        }
        paused.sort();
        paused
    }

    pub(crate) fn pause_job(&self, key: &JobKey) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let keys = inner.job_trigger_keys(key);
        let found = !keys.is_empty() || inner.jobs.contains_key(key);
        for tk in keys {
            inner.pause_record(&tk);
        }
        found
    }

    pub(crate) fn pause_job_group(&self, group: &str) -> Vec<JobKey> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.paused_job_groups.insert(group.to_string());
        let mut jobs: Vec<JobKey> = inner
            .jobs
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        for job in &jobs {
            let keys = inner.job_trigger_keys(job);
            for tk in keys {
                inner.pause_record(&tk);
            }
        }
        jobs.sort();
        jobs
    }

    /// Resume one trigger. Returns `(found, misfired snapshot)`; the
    /// misfire instruction is applied when the trigger's next fire time fell
    /// in the paused window.
    pub(crate) fn resume_trigger(
        &self,
        key: &TriggerKey,
        now: DateTime<Utc>,
    ) -> (bool, Option<Trigger>) {
        self.inner.write().resume_record(key, now)
    }

    pub(crate) fn resume_trigger_group(
        &self,
        group: &str,
        now: DateTime<Utc>,
    ) -> (Vec<TriggerKey>, Vec<Trigger>) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.paused_trigger_groups.remove(group);
        inner.resume_group_records(now, |k| k.group() == group)
    }

    pub(crate) fn resume_job(&self, key: &JobKey, now: DateTime<Utc>) -> (bool, Vec<Trigger>) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let keys = inner.job_trigger_keys(key);
        let found = !keys.is_empty() || inner.jobs.contains_key(key);
        let mut misfired = Vec::new();
        for tk in keys {
            let (_, mf) = inner.resume_record(&tk, now);
            misfired.extend(mf);
        }
        (found, misfired)
    }

    pub(crate) fn resume_job_group(
        &self,
        group: &str,
        now: DateTime<Utc>,
    ) -> (Vec<JobKey>, Vec<Trigger>) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.paused_job_groups.remove(group);
        let mut jobs: Vec<JobKey> = inner
            .jobs
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        let mut misfired = Vec::new();
        for job in &jobs {
            let keys = inner.job_trigger_keys(job);
            for tk in keys {
                let (_, mf) = inner.resume_record(&tk, now);
                misfired.extend(mf);
            }
        }
        jobs.sort();
        (jobs, misfired)
    }

    /// Pause every trigger group, current and future.
    pub(crate) fn pause_all(&self) -> Vec<String> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.all_paused = true;
        let groups: BTreeSet<String> = inner
            .triggers
            .keys()
            .map(|k| k.group().to_string())
            .collect();
        for group in &groups {
            inner.paused_trigger_groups.insert(group.clone());
        }
        let keys: Vec<TriggerKey> = inner.triggers.keys().cloned().collect();
        for key in keys {
            inner.pause_record(&key);
        }
        groups.into_iter().collect()
    }

    /// Clear every pause marker and resume all triggers.
    pub(crate) fn resume_all(&self, now: DateTime<Utc>) -> (Vec<String>, Vec<Trigger>) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.all_paused = false;
        let groups: Vec<String> = {
            let set: BTreeSet<String> = inner.paused_trigger_groups.drain().collect();
            set.into_iter().collect()
        };
        inner.paused_job_groups.clear();
        let (_, misfired) = inner.resume_group_records(now, |_| true);
        (groups, misfired)
    }

    // ── firing ────────────────────────────────────────────────────────────────

    /// Claim up to `max_count` due triggers in `(next_fire_time, priority
    /// desc, key)` order. Overdue triggers beyond the misfire threshold are
    /// rewritten by their misfire instruction instead of being claimed, and
    /// reported in the outcome. Triggers of a stateful job that is executing
    /// (or already claimed in this batch) are skipped.
    pub(crate) fn acquire_next_triggers(
        &self,
        now: DateTime<Utc>,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        misfire_threshold: Duration,
    ) -> AcquireOutcome {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut outcome = AcquireOutcome {
            acquired: Vec::new(),
            misfired: Vec::new(),
        };
        let mut claimed_stateful: HashSet<JobKey> = HashSet::new();
        let candidates: Vec<QueueKey> = inner.queue.iter().cloned().collect();

        for qk in candidates {
            if outcome.acquired.len() >= max_count {
                break;
            }
            let (state, next, job_key) = match inner.triggers.get(&qk.key) {
                Some(rec) => (
                    rec.state,
                    rec.trigger.next_fire_time(),
                    rec.trigger.job_key().clone(),
                ),
                None => {
                    inner.queue.remove(&qk);
                    continue;
                }
            };
            if state != RecordState::Waiting {
                inner.queue.remove(&qk);
                continue;
            }
            let Some(next) = next else {
                inner.queue.remove(&qk);
                continue;
            };
            if next + misfire_threshold < now {
                // Ignore-policy triggers keep their schedule and fire late;
                // everything else is rewritten and re-queued.
                match inner.apply_misfire(&qk.key, now) {
                    Some(snapshot) => {
                        outcome.misfired.push(snapshot);
                        continue;
                    }
                    None => {}
                }
            }
            if next > no_later_than {
                break;
            }
            let stateful = inner
                .jobs
                .get(&job_key)
                .map(|j| j.stateful)
                .unwrap_or(false);
            if stateful
                && (inner.blocked_jobs.contains(&job_key) || claimed_stateful.contains(&job_key))
            {
                continue;
            }
            if stateful {
                claimed_stateful.insert(job_key.clone());
            }

            inner.queue.remove(&qk);
            if let Some(rec) = inner.triggers.get_mut(&qk.key) {
                rec.state = RecordState::Acquired;
            }
            let fire_id = Uuid::new_v4();
            inner.fired.insert(
                fire_id,
                FiredRecord {
                    trigger_key: qk.key.clone(),
                    job_key,
                    scheduled_fire_time: next,
                    acquired_at: now,
                    fired: false,
                },
            );
            outcome.acquired.push(AcquiredTrigger {
                fire_id,
                key: qk.key.clone(),
                scheduled_fire_time: next,
            });
        }
        outcome
    }

    /// Hand back an acquisition without firing (trigger removed, paused, or
    /// the scheduler is stopping).
    pub(crate) fn release_acquired(&self, fire_id: Uuid) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(record) = inner.fired.remove(&fire_id) else {
            return;
        };
        let mut reattach = false;
        if let Some(rec) = inner.triggers.get_mut(&record.trigger_key) {
            if rec.state == RecordState::Acquired {
                rec.state = RecordState::Waiting;
                reattach = true;
            }
        }
        if reattach {
            inner.attach_trigger_record(&record.trigger_key);
        }
    }

    /// Commit a firing: advance the trigger, apply stateful blocking, and
    /// return the execution bundle. `None` means the reservation is no
    /// longer valid (the trigger was removed or paused since acquisition)
    /// and the fire must be abandoned.
    pub(crate) fn trigger_fired(&self, fire_id: Uuid, now: DateTime<Utc>) -> Option<FiredBundle> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let (trigger_key, scheduled) = {
            let record = inner.fired.get(&fire_id)?;
            (record.trigger_key.clone(), record.scheduled_fire_time)
        };

        let valid = inner
            .triggers
            .get(&trigger_key)
            .is_some_and(|rec| rec.state == RecordState::Acquired);
        if !valid {
            inner.fired.remove(&fire_id);
            return None;
        }
        let job_key = inner.triggers[&trigger_key].trigger.job_key().clone();
        let Some(job) = inner.jobs.get(&job_key).cloned() else {
            inner.fired.remove(&fire_id);
            return None;
        };
        let cal = inner.triggers[&trigger_key]
            .trigger
            .calendar_name()
            .and_then(|n| inner.calendars.get(n).cloned());

        let mut updated = inner.triggers[&trigger_key].trigger.clone();
        updated.triggered(cal.as_deref());
        let snapshot = updated.clone();
        let has_next = updated.next_fire_time().is_some();

        if let Some(rec) = inner.triggers.get_mut(&trigger_key) {
            rec.trigger = updated;
            rec.state = if job.stateful {
                RecordState::Blocked
            } else if has_next {
                RecordState::Waiting
            } else {
                RecordState::Complete
            };
        }
        if job.stateful {
            inner.blocked_jobs.insert(job_key.clone());
            let siblings = inner.job_trigger_keys(&job_key);
            for tk in siblings {
                if tk == trigger_key {
                    continue;
                }
                inner.detach_trigger_record(&tk);
                if let Some(sib) = inner.triggers.get_mut(&tk) {
                    sib.state = match sib.state {
                        RecordState::Waiting | RecordState::Acquired => RecordState::Blocked,
                        RecordState::Paused => RecordState::PausedBlocked,
                        other => other,
                    };
                }
            }
        } else if has_next {
            inner.attach_trigger_record(&trigger_key);
        }

        if let Some(record) = inner.fired.get_mut(&fire_id) {
            record.fired = true;
        }

        Some(FiredBundle {
            job,
            trigger: snapshot,
            scheduled_fire_time: scheduled,
            actual_fire_time: now,
        })
    }

    /// Finish a firing: release stateful blocking, apply the completion
    /// instruction, and finalize or clean up exhausted triggers.
    pub(crate) fn trigger_completed(
        &self,
        fire_id: Uuid,
        instruction: CompletionInstruction,
    ) -> CompletionEffects {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(record) = inner.fired.remove(&fire_id) else {
            return CompletionEffects::default();
        };
        let trigger_key = record.trigger_key;
        let job_key = record.job_key;
        let mut effects = CompletionEffects::default();

        let stateful = inner
            .jobs
            .get(&job_key)
            .map(|j| j.stateful)
            .unwrap_or(false);
        if stateful {
            inner.blocked_jobs.remove(&job_key);
            let siblings = inner.job_trigger_keys(&job_key);
            for tk in siblings {
                let mut reattach = false;
                if let Some(sib) = inner.triggers.get_mut(&tk) {
                    match sib.state {
                        RecordState::Blocked => {
                            if sib.trigger.next_fire_time().is_some() {
                                sib.state = RecordState::Waiting;
                                reattach = true;
                            } else {
                                sib.state = RecordState::Complete;
                            }
                        }
                        RecordState::PausedBlocked => {
                            sib.state = RecordState::Paused;
                        }
                        _ => {}
                    }
                }
                if reattach {
                    inner.attach_trigger_record(&tk);
                }
            }
        }

        match instruction {
            CompletionInstruction::Noop | CompletionInstruction::ReExecuteJob => {}
            CompletionInstruction::DeleteTrigger => {
                if let Some(rec) = inner.triggers.get(&trigger_key) {
                    effects.finalized = Some(rec.trigger.clone());
                }
                inner.remove_trigger_record(&trigger_key);
                return effects;
            }
            CompletionInstruction::SetTriggerComplete => {
                inner.set_complete(&trigger_key);
            }
            CompletionInstruction::SetAllJobTriggersComplete => {
                let siblings = inner.job_trigger_keys(&job_key);
                for tk in siblings {
                    inner.set_complete(&tk);
                }
            }
        }

        let mut remove_manual = false;
        if let Some(rec) = inner.triggers.get_mut(&trigger_key) {
            if rec.trigger.next_fire_time().is_none() {
                if rec.state == RecordState::Waiting {
                    rec.state = RecordState::Complete;
                }
                if rec.state == RecordState::Complete {
                    effects.finalized = Some(rec.trigger.clone());
                }
                // Ad-hoc one-shot triggers clean themselves up entirely.
                remove_manual = trigger_key.group() == MANUAL_TRIGGER_GROUP;
            }
        }
        if remove_manual {
            inner.remove_trigger_record(&trigger_key);
        }
        effects
    }

    // ── misfires and recovery ─────────────────────────────────────────────────

    /// Rewrite every waiting trigger that is overdue beyond the threshold.
    /// Returns snapshots of the rewritten triggers for listener
    /// notification. Runs entirely inside the write lock, so acquisition
    /// never observes a trigger mid-rewrite.
    pub(crate) fn scan_misfires(
        &self,
        now: DateTime<Utc>,
        misfire_threshold: Duration,
    ) -> Vec<Trigger> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let overdue: Vec<TriggerKey> = inner
            .triggers
            .iter()
            .filter(|(_, r)| {
                r.state == RecordState::Waiting
                    && r.trigger
                        .next_fire_time()
                        .is_some_and(|next| next + misfire_threshold < now)
            })
            .map(|(k, _)| k.clone())
            .collect();
        let mut misfired = Vec::new();
        for key in overdue {
            if let Some(snapshot) = inner.apply_misfire(&key, now) {
                misfired.push(snapshot);
            }
        }
        misfired
    }

    /// Release acquisitions that never reached `trigger_fired` within the
    /// lease. Run at scheduler start as the single-node recovery pass.
    pub(crate) fn recover_fired(&self, now: DateTime<Utc>, lease: Duration) -> usize {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let stale: Vec<Uuid> = inner
            .fired
            .iter()
            .filter(|(_, r)| !r.fired && r.acquired_at + lease < now)
            .map(|(id, _)| *id)
            .collect();
        let count = stale.len();
        for id in stale {
            if let Some(record) = inner.fired.remove(&id) {
                warn!(trigger = %record.trigger_key, "releasing stale trigger reservation");
                let mut reattach = false;
                if let Some(rec) = inner.triggers.get_mut(&record.trigger_key) {
                    if rec.state == RecordState::Acquired {
                        rec.state = RecordState::Waiting;
                        reattach = true;
                    }
                }
                if reattach {
                    inner.attach_trigger_record(&record.trigger_key);
                }
            }
        }
        count
    }
}

impl Inner {
    fn job_trigger_keys(&self, job: &JobKey) -> Vec<TriggerKey> {
        let mut keys: Vec<TriggerKey> = self
            .triggers
            .iter()
            .filter(|(_, r)| r.trigger.job_key() == job)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove the queue entry for a trigger, keyed by its current snapshot.
    fn detach_trigger_record(&mut self, key: &TriggerKey) {
        if let Some(qk) = self
            .triggers
            .get(key)
            .and_then(|rec| QueueKey::of(&rec.trigger))
        {
            self.queue.remove(&qk);
        }
    }

    /// Insert the queue entry for a waiting trigger.
    fn attach_trigger_record(&mut self, key: &TriggerKey) {
        let qk = match self.triggers.get(key) {
            Some(rec) if rec.state == RecordState::Waiting => QueueKey::of(&rec.trigger),
            _ => None,
        };
        if let Some(qk) = qk {
            self.queue.insert(qk);
        }
    }

    /// Insert a fresh trigger record, deriving its initial state from the
    /// pause markers and the blocked-job set.
    fn insert_trigger_record(&mut self, trigger: Trigger) {
        let key = trigger.key().clone();
        let group_paused = self.all_paused
            || self.paused_trigger_groups.contains(key.group())
            || self.paused_job_groups.contains(trigger.job_key().group());
        let job_blocked = self.blocked_jobs.contains(trigger.job_key());
        let state = match (group_paused, job_blocked) {
            (true, _) => {
                if job_blocked {
                    RecordState::PausedBlocked
                } else {
                    RecordState::Paused
                }
            }
            (false, true) => RecordState::Blocked,
            (false, false) => RecordState::Waiting,
        };
        debug!(trigger = %key, ?state, "trigger stored");
        self.triggers
            .insert(key.clone(), TriggerRecord { trigger, state });
        self.attach_trigger_record(&key);
    }

    /// Remove a trigger and, when its job is left orphaned and non-durable,
    /// the job as well.
    fn remove_trigger_record(&mut self, key: &TriggerKey) -> bool {
        self.detach_trigger_record(key);
        let Some(rec) = self.triggers.remove(key) else {
            return false;
        };
        let job_key = rec.trigger.job_key().clone();
        let orphaned = !self
            .triggers
            .values()
            .any(|r| r.trigger.job_key() == &job_key);
        if orphaned {
            let non_durable = self.jobs.get(&job_key).is_some_and(|j| !j.durable);
            if non_durable {
                debug!(job = %job_key, "removing orphaned non-durable job");
                self.jobs.remove(&job_key);
                self.blocked_jobs.remove(&job_key);
            }
        }
        true
    }

    fn pause_record(&mut self, key: &TriggerKey) -> bool {
        self.detach_trigger_record(key);
        let Some(rec) = self.triggers.get_mut(key) else {
            return false;
        };
        rec.state = match rec.state {
            RecordState::Waiting | RecordState::Acquired | RecordState::Paused => {
                RecordState::Paused
            }
            RecordState::Blocked | RecordState::PausedBlocked => RecordState::PausedBlocked,
            other => other,
        };
        true
    }

    fn resume_record(&mut self, key: &TriggerKey, now: DateTime<Utc>) -> (bool, Option<Trigger>) {
        let Some(rec) = self.triggers.get(key) else {
            return (false, None);
        };
        if rec.state != RecordState::Paused && rec.state != RecordState::PausedBlocked {
            return (true, None);
        }
        // A fire time that fell inside the paused window is a misfire.
        let missed = rec.trigger.next_fire_time().is_some_and(|next| next < now);
        let misfired = if missed {
            self.apply_misfire(key, now)
        } else {
            None
        };

        let Some(rec) = self.triggers.get_mut(key) else {
            return (true, misfired);
        };
        if rec.state == RecordState::Complete {
            return (true, misfired);
        }
        let blocked = rec.state == RecordState::PausedBlocked
            || self.blocked_jobs.contains(rec.trigger.job_key());
        rec.state = if blocked {
            RecordState::Blocked
        } else {
            RecordState::Waiting
        };
        self.attach_trigger_record(key);
        (true, misfired)
    }

    fn resume_group_records<F>(
        &mut self,
        now: DateTime<Utc>,
        matches: F,
    ) -> (Vec<TriggerKey>, Vec<Trigger>)
    where
        F: Fn(&TriggerKey) -> bool,
    {
        let keys: Vec<TriggerKey> = self
            .triggers
            .iter()
            .filter(|(k, r)| {
                matches(k)
                    && (r.state == RecordState::Paused || r.state == RecordState::PausedBlocked)
            })
            .map(|(k, _)| k.clone())
            .collect();
        let mut resumed = Vec::new();
        let mut misfired = Vec::new();
        for key in keys {
            let (_, mf) = self.resume_record(&key, now);
            resumed.push(key);
            misfired.extend(mf);
        }
        resumed.sort();
        (resumed, misfired)
    }

    /// Apply the trigger's misfire instruction. Returns the rewritten
    /// snapshot, or `None` for ignore-policy triggers which keep their
    /// schedule.
    fn apply_misfire(&mut self, key: &TriggerKey, now: DateTime<Utc>) -> Option<Trigger> {
        let (ignored, cal) = {
            let rec = self.triggers.get(key)?;
            let ignored =
                rec.trigger.effective_misfire_instruction() == MisfireInstruction::IgnorePolicy;
            let cal = rec
                .trigger
                .calendar_name()
                .and_then(|n| self.calendars.get(n).cloned());
            (ignored, cal)
        };
        if ignored {
            return None;
        }
        self.detach_trigger_record(key);
        let rec = self.triggers.get_mut(key)?;
        let mut updated = rec.trigger.clone();
        updated.update_after_misfire(cal.as_deref(), now);
        let snapshot = updated.clone();
        let has_next = updated.next_fire_time().is_some();
        rec.trigger = updated;
        if has_next {
            self.attach_trigger_record(key);
        } else {
            rec.state = RecordState::Complete;
        }
        Some(snapshot)
    }

    fn set_complete(&mut self, key: &TriggerKey) {
        self.detach_trigger_record(key);
        if let Some(rec) = self.triggers.get_mut(key) {
            rec.state = RecordState::Complete;
        }
    }
}
