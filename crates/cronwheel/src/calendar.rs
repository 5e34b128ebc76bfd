//! Calendars: inclusion filters applied to trigger fire times.
//!
//! A calendar answers whether an instant is acceptable for firing; excluded
//! instants (holidays, blackout days) are skipped by advancing the trigger
//! to its next fire time. Calendars chain through an optional base: an
//! instant is included only if the whole chain includes it.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

use crate::error::{Result, SchedulerError};

pub trait Calendar: Send + Sync {
    /// The calendar this one refines, if any.
    fn base(&self) -> Option<&Arc<dyn Calendar>> {
        None
    }

    /// Whether `instant` is acceptable for firing, consulting the base
    /// calendar first.
    fn is_time_included(&self, instant: DateTime<Utc>) -> bool;

    /// First included instant at or after `instant`. Used to report how far
    /// a blackout extends; trigger advancement itself walks fire times.
    fn next_included_time(&self, instant: DateTime<Utc>) -> DateTime<Utc>;
}

fn date_of(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

/// Excludes whole days of the week (civil days in UTC).
pub struct WeeklyCalendar {
    excluded: HashSet<Weekday>,
    base: Option<Arc<dyn Calendar>>,
}

impl WeeklyCalendar {
    /// Errors when every day of the week is excluded, which would leave no
    /// fire time includable.
    pub fn new(excluded: impl IntoIterator<Item = Weekday>) -> Result<Self> {
        let excluded: HashSet<Weekday> = excluded.into_iter().collect();
        if excluded.len() == 7 {
            return Err(SchedulerError::InvalidConfiguration(
                "weekly calendar excludes every day of the week".to_string(),
            ));
        }
        Ok(Self {
            excluded,
            base: None,
        })
    }

    pub fn with_base(mut self, base: Arc<dyn Calendar>) -> Self {
        self.base = Some(base);
        self
    }
}

impl Calendar for WeeklyCalendar {
    fn base(&self) -> Option<&Arc<dyn Calendar>> {
        self.base.as_ref()
    }

    fn is_time_included(&self, instant: DateTime<Utc>) -> bool {
        if let Some(base) = &self.base {
            if !base.is_time_included(instant) {
                return false;
            }
        }
        !self.excluded.contains(&date_of(instant).weekday())
    }

    fn next_included_time(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let mut t = instant;
        while !self.is_time_included(t) {
            // Excluded instants are excluded for the whole civil day.
            t = start_of_day(date_of(t) + Duration::days(1));
        }
        t
    }
}

/// Excludes specific dates (civil days in UTC).
pub struct HolidayCalendar {
    excluded: BTreeSet<NaiveDate>,
    base: Option<Arc<dyn Calendar>>,
}

impl HolidayCalendar {
    pub fn new(excluded: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
            base: None,
        }
    }

    pub fn with_base(mut self, base: Arc<dyn Calendar>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn add_excluded_date(&mut self, date: NaiveDate) {
        self.excluded.insert(date);
    }
}

impl Calendar for HolidayCalendar {
    fn base(&self) -> Option<&Arc<dyn Calendar>> {
        self.base.as_ref()
    }

    fn is_time_included(&self, instant: DateTime<Utc>) -> bool {
        if let Some(base) = &self.base {
            if !base.is_time_included(instant) {
                return false;
            }
        }
        !self.excluded.contains(&date_of(instant))
    }

    fn next_included_time(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let mut t = instant;
        while !self.is_time_included(t) {
            t = start_of_day(date_of(t) + Duration::days(1));
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp")
    }

    #[test]
    fn weekly_excludes_weekends() {
        let cal = WeeklyCalendar::new([Weekday::Sat, Weekday::Sun]).unwrap();
        // 2024-01-06 is a Saturday.
        assert!(!cal.is_time_included(utc("2024-01-06T10:00:00Z")));
        assert!(cal.is_time_included(utc("2024-01-08T10:00:00Z")));
    }

    #[test]
    fn weekly_next_included_lands_on_monday() {
        let cal = WeeklyCalendar::new([Weekday::Sat, Weekday::Sun]).unwrap();
        let next = cal.next_included_time(utc("2024-01-06T10:00:00Z"));
        assert_eq!(next, utc("2024-01-08T00:00:00Z"));
    }

    #[test]
    fn weekly_rejects_all_days_excluded() {
        let all = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        assert!(WeeklyCalendar::new(all).is_err());
    }

    #[test]
    fn holiday_excludes_single_date() {
        let cal = HolidayCalendar::new([NaiveDate::from_ymd_opt(2024, 12, 25).unwrap()]);
        assert!(!cal.is_time_included(utc("2024-12-25T09:00:00Z")));
        assert!(cal.is_time_included(utc("2024-12-26T09:00:00Z")));
    }

    #[test]
    fn chained_calendars_combine_exclusions() {
        let weekends: Arc<dyn Calendar> =
            Arc::new(WeeklyCalendar::new([Weekday::Sat, Weekday::Sun]).unwrap());
        let cal = HolidayCalendar::new([NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()])
            .with_base(weekends);
        // Saturday excluded by the base, the 8th by the holiday itself.
        assert!(!cal.is_time_included(utc("2024-01-06T10:00:00Z")));
        assert!(!cal.is_time_included(utc("2024-01-08T10:00:00Z")));
        assert!(cal.is_time_included(utc("2024-01-09T10:00:00Z")));
    }
}
