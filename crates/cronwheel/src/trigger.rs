//! Triggers: recurrence plus firing state for a job.
//!
//! The two variants share a common header (key, job key, window, fire
//! times, priority, calendar, misfire instruction) and differ only in how
//! the next fire time is computed: a fixed-interval grid anchored at the
//! start time, or a cron expression evaluated in a time zone.

use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use cronwheel_cron::CronExpression;

use crate::calendar::Calendar;
use crate::error::{Result, SchedulerError};
use crate::job::JobDataMap;
use crate::key::{JobKey, TriggerKey};

pub const DEFAULT_PRIORITY: i32 = 5;

/// Fire times are never computed past this year.
const MAX_YEAR: i32 = 2099;

/// Externally observable trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Normal,
    Paused,
    Complete,
    Error,
    Blocked,
    PausedBlocked,
    /// Not present in the registry.
    None,
}

/// How many times a simple trigger repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Indefinite,
    Times(u32),
}

/// Per-trigger misfire handling, applied when a fire time is more than the
/// scheduler's misfire threshold in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireInstruction {
    /// Translated to a concrete instruction per trigger variant at check
    /// time.
    SmartPolicy,
    /// Keep the original schedule even if overdue.
    IgnorePolicy,
    /// Skip the missed fires; next fire time becomes the next scheduled
    /// time strictly after now.
    DoNothing,
    /// Simple triggers: fire immediately.
    FireNow,
    /// Simple triggers: re-anchor the schedule at now, keeping the repeat
    /// budget as if no fires were missed.
    RescheduleNowWithExistingCount,
    /// Simple triggers: re-anchor at now with only the remaining repeats.
    RescheduleNowWithRemainingCount,
    /// Simple triggers: advance past the missed fires without counting them
    /// against the repeat budget.
    RescheduleNextWithExistingCount,
    /// Simple triggers: advance past the missed fires, counting them
    /// against the repeat budget.
    RescheduleNextWithRemainingCount,
    /// Cron triggers: fire once immediately, then return to the schedule.
    FireOnceNow,
}

/// Variant-specific recurrence state.
#[derive(Debug, Clone)]
pub enum TriggerKind {
    Simple {
        repeat_count: RepeatCount,
        repeat_interval: Duration,
        times_triggered: u32,
    },
    Cron {
        expr: CronExpression,
        timezone: Tz,
    },
}

/// A recurrence specification bound to a job.
///
/// Triggers are value objects: the registry stores snapshots and replaces
/// them wholesale on update.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    job_key: JobKey,
    description: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    priority: i32,
    calendar_name: Option<String>,
    misfire_instruction: MisfireInstruction,
    volatile: bool,
    data: JobDataMap,
    kind: TriggerKind,
}

impl Trigger {
    /// Fixed-interval trigger starting at `start_time`.
    pub fn simple(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        repeat_count: RepeatCount,
        repeat_interval: Duration,
    ) -> Self {
        Self {
            key,
            job_key,
            description: None,
            start_time,
            end_time: None,
            previous_fire_time: None,
            next_fire_time: None,
            priority: DEFAULT_PRIORITY,
            calendar_name: None,
            misfire_instruction: MisfireInstruction::SmartPolicy,
            volatile: false,
            data: JobDataMap::new(),
            kind: TriggerKind::Simple {
                repeat_count,
                repeat_interval,
                times_triggered: 0,
            },
        }
    }

    /// Single-shot trigger firing at `at`.
    pub fn one_shot(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        Self::simple(key, job_key, at, RepeatCount::Times(0), Duration::zero())
    }

    /// Cron trigger evaluating `expr` in `timezone`. Parse errors surface
    /// here, never at fire time.
    pub fn cron(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        expr: &str,
        timezone: Tz,
    ) -> Result<Self> {
        let expr = CronExpression::parse(expr)?;
        Ok(Self {
            key,
            job_key,
            description: None,
            start_time,
            end_time: None,
            previous_fire_time: None,
            next_fire_time: None,
            priority: DEFAULT_PRIORITY,
            calendar_name: None,
            misfire_instruction: MisfireInstruction::SmartPolicy,
            volatile: false,
            data: JobDataMap::new(),
            kind: TriggerKind::Cron {
                expr,
                timezone,
            },
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_calendar(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = Some(name.into());
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_volatility(mut self, volatile: bool) -> Self {
        self.volatile = volatile;
        self
    }

    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    pub fn misfire_instruction(&self) -> MisfireInstruction {
        self.misfire_instruction
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    pub(crate) fn set_next_fire_time(&mut self, next: Option<DateTime<Utc>>) {
        self.next_fire_time = next;
    }

    /// Field and misfire-instruction validation, applied before a trigger is
    /// accepted into the registry.
    pub fn validate(&self) -> Result<()> {
        if !self.key.is_well_formed() {
            return Err(SchedulerError::InvalidConfiguration(
                "trigger key must have a non-empty name and group".to_string(),
            ));
        }
        if !self.job_key.is_well_formed() {
            return Err(SchedulerError::InvalidConfiguration(
                "trigger job key must have a non-empty name and group".to_string(),
            ));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "trigger '{}' ends before it starts",
                    self.key
                )));
            }
        }
        if let TriggerKind::Simple {
            repeat_count,
            repeat_interval,
            ..
        } = &self.kind
        {
            if *repeat_count != RepeatCount::Times(0) && *repeat_interval <= Duration::zero() {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "trigger '{}' repeats with a non-positive interval",
                    self.key
                )));
            }
        }
        let instruction_ok = match (self.misfire_instruction, &self.kind) {
            (
                MisfireInstruction::SmartPolicy
                | MisfireInstruction::IgnorePolicy
                | MisfireInstruction::DoNothing,
                _,
            ) => true,
            (
                MisfireInstruction::FireNow
                | MisfireInstruction::RescheduleNowWithExistingCount
                | MisfireInstruction::RescheduleNowWithRemainingCount
                | MisfireInstruction::RescheduleNextWithExistingCount
                | MisfireInstruction::RescheduleNextWithRemainingCount,
                TriggerKind::Simple { .. },
            ) => true,
            (MisfireInstruction::FireOnceNow, TriggerKind::Cron { .. }) => true,
            _ => false,
        };
        if !instruction_ok {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "misfire instruction {:?} is not valid for trigger '{}'",
                self.misfire_instruction, self.key
            )));
        }
        Ok(())
    }

    /// First fire time respecting the calendar, or `None` when the trigger
    /// will never fire.
    pub fn computed_first_fire_time(&self, cal: Option<&dyn Calendar>) -> Option<DateTime<Utc>> {
        let first = self.fire_time_after(None);
        self.next_included_fire_time(first, cal)
    }

    /// Next fire time strictly after `after` (after `start_time - 1s` when
    /// `None`), ignoring calendars.
    pub fn fire_time_after(&self, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Simple { .. } => self.simple_fire_time_after(after),
            TriggerKind::Cron { .. } => self.cron_fire_time_after(after),
        }
    }

    fn simple_fire_time_after(&self, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let TriggerKind::Simple {
            repeat_count,
            repeat_interval,
            times_triggered,
        } = &self.kind
        else {
            return None;
        };
        if let RepeatCount::Times(n) = repeat_count {
            if *times_triggered > *n {
                return None;
            }
        }
        let after = after.unwrap_or(self.start_time - Duration::seconds(1));
        let candidate = if after < self.start_time {
            self.start_time
        } else {
            if *repeat_count == RepeatCount::Times(0) {
                return None;
            }
            let ivl = repeat_interval.num_milliseconds();
            if ivl <= 0 {
                return None;
            }
            let elapsed = (after - self.start_time).num_milliseconds();
            let n = elapsed / ivl + 1;
            if let RepeatCount::Times(max) = repeat_count {
                if n > *max as i64 {
                    return None;
                }
            }
            self.start_time + Duration::milliseconds(ivl * n)
        };
        match self.end_time {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }

    fn cron_fire_time_after(&self, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let TriggerKind::Cron { expr, timezone } = &self.kind else {
            return None;
        };
        let floor = self.start_time - Duration::seconds(1);
        let after = after.map_or(floor, |a| a.max(floor));
        let next = expr.next_after(after, *timezone)?;
        match self.end_time {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    /// Walk fire times until one is included by the calendar, bounded by the
    /// maximum supported year.
    fn next_included_fire_time(
        &self,
        mut from: Option<DateTime<Utc>>,
        cal: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        let Some(cal) = cal else {
            return from;
        };
        while let Some(t) = from {
            if t.year() > MAX_YEAR {
                return None;
            }
            if cal.is_time_included(t) {
                return Some(t);
            }
            from = self.fire_time_after(Some(t));
        }
        None
    }

    /// Advance to the next fire: record the fire that just happened and
    /// compute the one after it.
    pub fn triggered(&mut self, cal: Option<&dyn Calendar>) {
        if let TriggerKind::Simple {
            times_triggered, ..
        } = &mut self.kind
        {
            *times_triggered += 1;
        }
        self.previous_fire_time = self.next_fire_time;
        let next = self.fire_time_after(self.next_fire_time);
        self.next_fire_time = self.next_included_fire_time(next, cal);
    }

    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// Last instant at which this trigger can fire, or `None` when it is
    /// unbounded.
    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Simple {
                repeat_count,
                repeat_interval,
                ..
            } => {
                let ivl = repeat_interval.num_milliseconds();
                let by_count = |n: u32| {
                    if ivl <= 0 {
                        self.start_time
                    } else {
                        self.start_time + Duration::milliseconds(ivl * n as i64)
                    }
                };
                match (repeat_count, self.end_time) {
                    (RepeatCount::Indefinite, None) => None,
                    (RepeatCount::Indefinite, Some(end)) => {
                        last_grid_time_not_after(self.start_time, ivl, end)
                    }
                    (RepeatCount::Times(n), None) => Some(by_count(*n)),
                    (RepeatCount::Times(n), Some(end)) => {
                        last_grid_time_not_after(self.start_time, ivl, end)
                            .map(|t| t.min(by_count(*n)))
                    }
                }
            }
            TriggerKind::Cron { expr, timezone } => {
                let end = self.end_time?;
                expr.final_fire_time_between(self.start_time, end, *timezone)
            }
        }
    }

    /// The concrete instruction applied on misfire, resolving
    /// [`MisfireInstruction::SmartPolicy`] per variant.
    pub fn effective_misfire_instruction(&self) -> MisfireInstruction {
        if self.misfire_instruction != MisfireInstruction::SmartPolicy {
            return self.misfire_instruction;
        }
        match &self.kind {
            TriggerKind::Simple { repeat_count, .. } => match repeat_count {
                RepeatCount::Times(0) => MisfireInstruction::FireNow,
                RepeatCount::Indefinite => MisfireInstruction::RescheduleNextWithRemainingCount,
                RepeatCount::Times(_) => MisfireInstruction::RescheduleNowWithExistingCount,
            },
            TriggerKind::Cron { .. } => MisfireInstruction::FireOnceNow,
        }
    }

    /// Rewrite the schedule after a detected misfire.
    pub fn update_after_misfire(&mut self, cal: Option<&dyn Calendar>, now: DateTime<Utc>) {
        match self.effective_misfire_instruction() {
            MisfireInstruction::SmartPolicy => unreachable!("resolved above"),
            MisfireInstruction::IgnorePolicy => {}
            MisfireInstruction::FireNow | MisfireInstruction::FireOnceNow => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::DoNothing
            | MisfireInstruction::RescheduleNextWithExistingCount => {
                let next = self.fire_time_after(Some(now));
                self.next_fire_time = self.next_included_fire_time(next, cal);
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                let old_next = self.next_fire_time;
                let next = self.fire_time_after(Some(now));
                let next = self.next_included_fire_time(next, cal);
                if let (Some(old), Some(new)) = (old_next, next) {
                    if let TriggerKind::Simple {
                        repeat_interval,
                        times_triggered,
                        ..
                    } = &mut self.kind
                    {
                        let ivl = repeat_interval.num_milliseconds();
                        if ivl > 0 {
                            let missed = ((new - old).num_milliseconds() / ivl) as u32;
                            *times_triggered += missed;
                        }
                    }
                }
                self.next_fire_time = next;
            }
            MisfireInstruction::RescheduleNowWithExistingCount => {
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::RescheduleNowWithRemainingCount => {
                if let TriggerKind::Simple {
                    repeat_count,
                    times_triggered,
                    ..
                } = &mut self.kind
                {
                    if let RepeatCount::Times(n) = *repeat_count {
                        *repeat_count = RepeatCount::Times(n.saturating_sub(*times_triggered));
                    }
                    *times_triggered = 0;
                }
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
        }
    }

    /// Recompute the next fire time against a replaced calendar.
    pub(crate) fn update_with_new_calendar(&mut self, cal: Option<&dyn Calendar>) {
        let next = self.fire_time_after(self.previous_fire_time);
        self.next_fire_time = self.next_included_fire_time(next, cal);
    }
}

fn last_grid_time_not_after(
    start: DateTime<Utc>,
    ivl_ms: i64,
    end: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if end < start {
        return None;
    }
    if ivl_ms <= 0 {
        return Some(start);
    }
    let n = (end - start).num_milliseconds() / ivl_ms;
    Some(start + Duration::milliseconds(ivl_ms * n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::WeeklyCalendar;
    use chrono::Weekday;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp")
    }

    fn keys() -> (TriggerKey, JobKey) {
        (TriggerKey::new("t"), JobKey::new("j"))
    }

    fn every_five_minutes(start: DateTime<Utc>) -> Trigger {
        let (tk, jk) = keys();
        Trigger::simple(tk, jk, start, RepeatCount::Indefinite, Duration::minutes(5))
    }

    // ── fire time grid ────────────────────────────────────────────────────────

    #[test]
    fn first_fire_is_start_time() {
        let start = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(start);
        assert_eq!(t.fire_time_after(None), Some(start));
    }

    #[test]
    fn grid_advances_by_interval() {
        let start = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(start);
        let after = utc("2024-01-01T00:07:30Z");
        assert_eq!(
            t.fire_time_after(Some(after)),
            Some(utc("2024-01-01T00:10:00Z"))
        );
    }

    #[test]
    fn fire_exactly_on_grid_returns_next_slot() {
        let start = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(start);
        assert_eq!(
            t.fire_time_after(Some(start)),
            Some(utc("2024-01-01T00:05:00Z"))
        );
    }

    #[test]
    fn one_shot_never_fires_twice() {
        let (tk, jk) = keys();
        let at = utc("2024-01-01T12:00:00Z");
        let t = Trigger::one_shot(tk, jk, at);
        assert_eq!(t.fire_time_after(None), Some(at));
        assert_eq!(t.fire_time_after(Some(at)), None);
    }

    #[test]
    fn finite_repeat_exhausts() {
        let (tk, jk) = keys();
        let start = utc("2024-01-01T00:00:00Z");
        let t = Trigger::simple(tk, jk, start, RepeatCount::Times(2), Duration::minutes(1));
        // Fires at 00:00, 00:01, 00:02 and never again.
        assert_eq!(
            t.fire_time_after(Some(utc("2024-01-01T00:01:00Z"))),
            Some(utc("2024-01-01T00:02:00Z"))
        );
        assert_eq!(t.fire_time_after(Some(utc("2024-01-01T00:02:00Z"))), None);
    }

    #[test]
    fn end_time_caps_fire_times() {
        let start = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(start).with_end_time(utc("2024-01-01T00:10:00Z"));
        assert_eq!(
            t.fire_time_after(Some(utc("2024-01-01T00:09:00Z"))),
            Some(utc("2024-01-01T00:10:00Z")),
            "a fire exactly at the end time is allowed"
        );
        assert_eq!(t.fire_time_after(Some(utc("2024-01-01T00:10:00Z"))), None);
    }

    #[test]
    fn triggered_tracks_previous_and_next() {
        let start = utc("2024-01-01T00:00:00Z");
        let mut t = every_five_minutes(start);
        t.set_next_fire_time(t.computed_first_fire_time(None));
        t.triggered(None);
        assert_eq!(t.previous_fire_time(), Some(start));
        assert_eq!(t.next_fire_time(), Some(utc("2024-01-01T00:05:00Z")));
    }

    #[test]
    fn triggered_past_repeat_count_completes() {
        let (tk, jk) = keys();
        let start = utc("2024-01-01T00:00:00Z");
        let mut t = Trigger::simple(tk, jk, start, RepeatCount::Times(1), Duration::minutes(1));
        t.set_next_fire_time(t.computed_first_fire_time(None));
        t.triggered(None);
        assert!(t.may_fire_again());
        t.triggered(None);
        assert!(!t.may_fire_again(), "two fires exhaust repeat count 1");
    }

    // ── cron variant ──────────────────────────────────────────────────────────

    #[test]
    fn cron_trigger_follows_expression() {
        let (tk, jk) = keys();
        let t = Trigger::cron(tk, jk, utc("2024-01-01T00:00:00Z"), "0 0 12 * * ?", Tz::UTC)
            .unwrap();
        assert_eq!(t.fire_time_after(None), Some(utc("2024-01-01T12:00:00Z")));
    }

    #[test]
    fn cron_parse_error_surfaces_at_construction() {
        let (tk, jk) = keys();
        let err =
            Trigger::cron(tk, jk, utc("2024-01-01T00:00:00Z"), "not a cron", Tz::UTC).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
    }

    #[test]
    fn cron_start_time_floors_fire_times() {
        let (tk, jk) = keys();
        let t = Trigger::cron(tk, jk, utc("2024-06-01T00:00:00Z"), "0 0 12 * * ?", Tz::UTC)
            .unwrap();
        // Asking for a time before the start still respects the start floor.
        assert_eq!(
            t.fire_time_after(Some(utc("2024-01-01T00:00:00Z"))),
            Some(utc("2024-06-01T12:00:00Z"))
        );
    }

    // ── calendars ─────────────────────────────────────────────────────────────

    #[test]
    fn calendar_excluded_times_are_skipped() {
        let (tk, jk) = keys();
        // Daily at noon, but weekends excluded: Fri 2024-01-05 fires, then
        // Sat/Sun are skipped and Mon 2024-01-08 is next.
        let weekends = WeeklyCalendar::new([Weekday::Sat, Weekday::Sun]).unwrap();
        let mut t = Trigger::cron(tk, jk, utc("2024-01-05T00:00:00Z"), "0 0 12 * * ?", Tz::UTC)
            .unwrap();
        t.set_next_fire_time(t.computed_first_fire_time(Some(&weekends)));
        assert_eq!(t.next_fire_time(), Some(utc("2024-01-05T12:00:00Z")));
        t.triggered(Some(&weekends));
        assert_eq!(t.next_fire_time(), Some(utc("2024-01-08T12:00:00Z")));
    }

    // ── misfire handling ──────────────────────────────────────────────────────

    #[test]
    fn do_nothing_advances_to_next_boundary_after_now() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t =
            every_five_minutes(t0).with_misfire_instruction(MisfireInstruction::DoNothing);
        t.set_next_fire_time(Some(t0));
        // Scheduler was down from T0 to T0+35m.
        let now = t0 + Duration::minutes(35);
        t.update_after_misfire(None, now);
        let next = t.next_fire_time().unwrap();
        assert!(next > now, "next fire must be strictly after now");
        assert_eq!(next, t0 + Duration::minutes(40), "next 5-minute boundary");
    }

    #[test]
    fn ignore_policy_keeps_overdue_schedule() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t =
            every_five_minutes(t0).with_misfire_instruction(MisfireInstruction::IgnorePolicy);
        t.set_next_fire_time(Some(t0));
        t.update_after_misfire(None, t0 + Duration::minutes(35));
        assert_eq!(t.next_fire_time(), Some(t0), "schedule must be untouched");
    }

    #[test]
    fn smart_policy_on_one_shot_fires_now() {
        let (tk, jk) = keys();
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t = Trigger::one_shot(tk, jk, t0);
        t.set_next_fire_time(Some(t0));
        assert_eq!(
            t.effective_misfire_instruction(),
            MisfireInstruction::FireNow
        );
        let now = t0 + Duration::minutes(10);
        t.update_after_misfire(None, now);
        assert_eq!(t.next_fire_time(), Some(now));
    }

    #[test]
    fn smart_policy_on_indefinite_counts_missed_fires() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t = every_five_minutes(t0);
        t.set_next_fire_time(Some(t0));
        assert_eq!(
            t.effective_misfire_instruction(),
            MisfireInstruction::RescheduleNextWithRemainingCount
        );
        t.update_after_misfire(None, t0 + Duration::minutes(12));
        assert_eq!(t.next_fire_time(), Some(t0 + Duration::minutes(15)));
        let TriggerKind::Simple {
            times_triggered, ..
        } = t.kind()
        else {
            panic!("simple trigger")
        };
        assert_eq!(*times_triggered, 3, "fires at 0, 5 and 10 minutes were missed");
    }

    #[test]
    fn smart_policy_on_finite_reanchors_now() {
        let (tk, jk) = keys();
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t = Trigger::simple(
            tk,
            jk,
            t0,
            RepeatCount::Times(10),
            Duration::minutes(5),
        );
        t.set_next_fire_time(Some(t0));
        assert_eq!(
            t.effective_misfire_instruction(),
            MisfireInstruction::RescheduleNowWithExistingCount
        );
        let now = t0 + Duration::minutes(17);
        t.update_after_misfire(None, now);
        assert_eq!(t.next_fire_time(), Some(now));
        assert_eq!(t.start_time(), now, "grid re-anchors at now");
    }

    #[test]
    fn reschedule_now_with_remaining_count_shrinks_budget() {
        let (tk, jk) = keys();
        let t0 = utc("2024-01-01T00:00:00Z");
        let mut t = Trigger::simple(tk, jk, t0, RepeatCount::Times(10), Duration::minutes(5))
            .with_misfire_instruction(MisfireInstruction::RescheduleNowWithRemainingCount);
        if let TriggerKind::Simple {
            times_triggered, ..
        } = &mut t.kind
        {
            *times_triggered = 4;
        }
        t.set_next_fire_time(Some(t0 + Duration::minutes(20)));
        let now = t0 + Duration::minutes(40);
        t.update_after_misfire(None, now);
        let TriggerKind::Simple {
            repeat_count,
            times_triggered,
            ..
        } = t.kind()
        else {
            panic!("simple trigger")
        };
        assert_eq!(*repeat_count, RepeatCount::Times(6));
        assert_eq!(*times_triggered, 0);
        assert_eq!(t.next_fire_time(), Some(now));
    }

    #[test]
    fn cron_smart_policy_fires_once_now() {
        let (tk, jk) = keys();
        let mut t = Trigger::cron(tk, jk, utc("2024-01-01T00:00:00Z"), "0 0 12 * * ?", Tz::UTC)
            .unwrap();
        t.set_next_fire_time(Some(utc("2024-01-01T12:00:00Z")));
        assert_eq!(
            t.effective_misfire_instruction(),
            MisfireInstruction::FireOnceNow
        );
        let now = utc("2024-01-03T07:00:00Z");
        t.update_after_misfire(None, now);
        assert_eq!(t.next_fire_time(), Some(now));
    }

    // ── final fire time ───────────────────────────────────────────────────────

    #[test]
    fn final_fire_time_of_finite_simple_trigger() {
        let (tk, jk) = keys();
        let t0 = utc("2024-01-01T00:00:00Z");
        let t = Trigger::simple(tk, jk, t0, RepeatCount::Times(3), Duration::minutes(10));
        assert_eq!(t.final_fire_time(), Some(t0 + Duration::minutes(30)));
    }

    #[test]
    fn final_fire_time_respects_end_time() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(t0).with_end_time(t0 + Duration::minutes(17));
        assert_eq!(t.final_fire_time(), Some(t0 + Duration::minutes(15)));
    }

    #[test]
    fn final_fire_time_of_unbounded_triggers_is_none() {
        let t0 = utc("2024-01-01T00:00:00Z");
        assert_eq!(every_five_minutes(t0).final_fire_time(), None);
        let (tk, jk) = keys();
        let cron = Trigger::cron(tk, jk, t0, "0 0 12 * * ?", Tz::UTC).unwrap();
        assert_eq!(cron.final_fire_time(), None);
    }

    #[test]
    fn final_fire_time_of_bounded_cron_trigger() {
        let (tk, jk) = keys();
        let t = Trigger::cron(
            tk,
            jk,
            utc("2024-01-01T00:00:00Z"),
            "0 0 12 * * ?",
            Tz::UTC,
        )
        .unwrap()
        .with_end_time(utc("2024-01-04T09:00:00Z"));
        assert_eq!(t.final_fire_time(), Some(utc("2024-01-03T12:00:00Z")));
    }

    // ── validation ────────────────────────────────────────────────────────────

    #[test]
    fn end_before_start_is_rejected() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(t0).with_end_time(t0 - Duration::hours(1));
        assert!(t.validate().is_err());
    }

    #[test]
    fn zero_interval_with_repeats_is_rejected() {
        let (tk, jk) = keys();
        let t = Trigger::simple(
            tk,
            jk,
            utc("2024-01-01T00:00:00Z"),
            RepeatCount::Times(5),
            Duration::zero(),
        );
        assert!(t.validate().is_err());
    }

    #[test]
    fn cron_only_instruction_rejected_on_simple_trigger() {
        let t0 = utc("2024-01-01T00:00:00Z");
        let t = every_five_minutes(t0)
            .with_misfire_instruction(MisfireInstruction::FireOnceNow);
        assert!(t.validate().is_err());
    }

    #[test]
    fn simple_only_instruction_rejected_on_cron_trigger() {
        let (tk, jk) = keys();
        let t = Trigger::cron(tk, jk, utc("2024-01-01T00:00:00Z"), "0 0 12 * * ?", Tz::UTC)
            .unwrap()
            .with_misfire_instruction(MisfireInstruction::FireNow);
        assert!(t.validate().is_err());
    }

    #[test]
    fn empty_key_name_is_rejected() {
        let t = Trigger::one_shot(
            TriggerKey::new(""),
            JobKey::new("j"),
            utc("2024-01-01T00:00:00Z"),
        );
        assert!(t.validate().is_err());
    }
}
