//! Seven-field cron expressions and next-fire-time evaluation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{ParseError, Result};
use crate::field::{
    parse_dom, parse_dow, parse_numeric_field, DomSpec, DowSpec, FieldSpec, MONTH_NAMES,
};

pub(crate) const MIN_YEAR: u32 = 1970;
pub(crate) const MAX_YEAR: u32 = 2099;

/// A parsed cron expression: `seconds minutes hours day-of-month month
/// day-of-week [year]`.
///
/// Evaluation is performed against the civil-time projection of an instant
/// in a caller-supplied time zone. Around daylight-saving transitions,
/// fire times between the transition boundaries may skip (spring-forward
/// gap) or land on the earlier of two occurrences (fall-back overlap);
/// this is inherent to civil-time recurrence.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    seconds: FieldSpec,
    minutes: FieldSpec,
    hours: FieldSpec,
    dom: DomSpec,
    months: FieldSpec,
    dow: DowSpec,
    years: FieldSpec,
}

impl CronExpression {
    /// Parse an expression. Errors carry the byte offset of the offending
    /// field within `expr`.
    pub fn parse(expr: &str) -> Result<Self> {
        let mut fields: Vec<(usize, &str)> = Vec::with_capacity(7);
        let mut cursor = 0;
        for part in expr.split_whitespace() {
            let pos = expr[cursor..]
                .find(part)
                .map(|i| i + cursor)
                .unwrap_or(cursor);
            fields.push((pos, part));
            cursor = pos + part.len();
        }
        if !(6..=7).contains(&fields.len()) {
            return Err(ParseError::invalid(
                0,
                format!("expected 6 or 7 fields, found {}", fields.len()),
            ));
        }

        let seconds = parse_numeric_field(fields[0].1, fields[0].0, 0, 59, None)?;
        let minutes = parse_numeric_field(fields[1].1, fields[1].0, 0, 59, None)?;
        let hours = parse_numeric_field(fields[2].1, fields[2].0, 0, 23, None)?;
        let dom = parse_dom(fields[3].1, fields[3].0)?;
        let months =
            parse_numeric_field(fields[4].1, fields[4].0, 1, 12, Some((&MONTH_NAMES, 1)))?;
        let dow = parse_dow(fields[5].1, fields[5].0)?;
        let years = match fields.get(6) {
            Some((pos, text)) => parse_numeric_field(text, *pos, MIN_YEAR, MAX_YEAR, None)?,
            None => FieldSpec::all(MIN_YEAR, MAX_YEAR),
        };

        if dom == DomSpec::Unspecified && dow == DowSpec::Unspecified {
            return Err(ParseError::unsupported(
                fields[5].0,
                "'?' cannot be used in both day-of-month and day-of-week",
            ));
        }

        Ok(Self {
            source: expr.trim().to_string(),
            seconds,
            minutes,
            hours,
            dom,
            months,
            dow,
            years,
        })
    }

    /// The original expression string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The smallest instant strictly after `after` matching this expression,
    /// evaluated in `tz`, or `None` once the year set is exhausted.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let start = tz.from_utc_datetime(&(after.naive_utc() + Duration::seconds(1)));
        let mut year = start.year();
        let mut month = start.month();
        let mut day = start.day();
        let mut hour = start.hour();
        let mut minute = start.minute();
        let mut second = start.second();

        loop {
            let y = u32::try_from(year).ok()?;
            match self.years.next_from(y) {
                Some(ny) if ny == y => {}
                Some(ny) => {
                    year = ny as i32;
                    month = 1;
                    day = 1;
                    hour = 0;
                    minute = 0;
                    second = 0;
                }
                None => return None,
            }

            match self.months.next_from(month) {
                Some(m) if m == month => {}
                Some(m) => {
                    month = m;
                    day = 1;
                    hour = 0;
                    minute = 0;
                    second = 0;
                }
                None => {
                    year += 1;
                    month = 1;
                    day = 1;
                    hour = 0;
                    minute = 0;
                    second = 0;
                    continue;
                }
            }

            let days = self.allowed_days(year, month);
            match days.range(day..).next().copied() {
                Some(d) if d == day => {}
                Some(d) => {
                    day = d;
                    hour = 0;
                    minute = 0;
                    second = 0;
                }
                None => {
                    month += 1;
                    day = 1;
                    hour = 0;
                    minute = 0;
                    second = 0;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                    continue;
                }
            }

            match self.hours.next_from(hour) {
                Some(h) if h == hour => {}
                Some(h) => {
                    hour = h;
                    minute = 0;
                    second = 0;
                }
                None => {
                    day += 1;
                    hour = 0;
                    minute = 0;
                    second = 0;
                    continue;
                }
            }

            match self.minutes.next_from(minute) {
                Some(m) if m == minute => {}
                Some(m) => {
                    minute = m;
                    second = 0;
                }
                None => {
                    hour += 1;
                    minute = 0;
                    second = 0;
                    continue;
                }
            }

            match self.seconds.next_from(second) {
                Some(s) if s == second => {}
                Some(s) => second = s,
                None => {
                    minute += 1;
                    second = 0;
                    continue;
                }
            }

            match resolve_in_zone(tz, year, month, day, hour, minute, second, after) {
                Some(t) if t > after => return Some(t),
                // Fall-back overlap folded at or before `after`; keep walking.
                _ => {
                    second += 1;
                    continue;
                }
            }
        }
    }

    /// Last matching instant in `[floor, ceiling]`, found by walking forward.
    ///
    /// Bounded by the expression's year set, so it terminates even for
    /// expressions that stop matching inside the interval.
    pub fn final_fire_time_between(
        &self,
        floor: DateTime<Utc>,
        ceiling: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let mut last = None;
        let mut cursor = floor - Duration::seconds(1);
        while let Some(t) = self.next_after(cursor, tz) {
            if t > ceiling {
                break;
            }
            last = Some(t);
            cursor = t;
        }
        last
    }

    /// Allowed days of month for `(year, month)`, combining the day-of-month
    /// and day-of-week fields. `*` and `?` carry no constraint; when both
    /// fields are concrete the two day sets are intersected, so the
    /// expression fires only when both are satisfied.
    fn allowed_days(&self, year: i32, month: u32) -> BTreeSet<u32> {
        let len = days_in_month(year, month);
        let dom: Option<BTreeSet<u32>> = match &self.dom {
            DomSpec::Unspecified | DomSpec::All => None,
            DomSpec::Days(set) => Some(set.range(1..=len).copied().collect()),
            DomSpec::LastDay => Some([len].into()),
            DomSpec::LastWeekday => Some([last_weekday_of_month(year, month)].into()),
            DomSpec::NearestWeekday(n) => Some([nearest_weekday(year, month, *n)].into()),
        };
        let dow: Option<BTreeSet<u32>> = match &self.dow {
            DowSpec::Unspecified | DowSpec::All => None,
            DowSpec::Days(set) => Some(
                (1..=len)
                    .filter(|&d| set.contains(&weekday_of(year, month, d)))
                    .collect(),
            ),
            DowSpec::LastOfMonth(w) => Some(
                (1..=len)
                    .rev()
                    .find(|&d| weekday_of(year, month, d) == *w)
                    .into_iter()
                    .collect(),
            ),
            DowSpec::Nth { weekday, nth } => Some(
                (1..=len)
                    .filter(|&d| weekday_of(year, month, d) == *weekday)
                    .nth(*nth as usize - 1)
                    .into_iter()
                    .collect(),
            ),
        };
        match (dom, dow) {
            (None, None) => (1..=len).collect(),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (Some(a), Some(b)) => a.intersection(&b).copied().collect(),
        }
    }
}

impl FromStr for CronExpression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolve a civil time in `tz` to an instant. A spring-forward gap advances
/// to the first existing instant; a fall-back overlap picks the earlier
/// occurrence unless that would not move past `after`.
#[allow(clippy::too_many_arguments)]
fn resolve_in_zone(
    tz: Tz,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    // Gaps are at most a few hours; advance minute-by-minute until the local
    // time exists.
    for _ in 0..(4 * 60) {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, later) => {
                let e = earlier.with_timezone(&Utc);
                return Some(if e > after {
                    e
                } else {
                    later.with_timezone(&Utc)
                });
            }
            LocalResult::None => naive += Duration::minutes(1),
        }
    }
    None
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
                29
            } else {
                28
            }
        }
    }
}

/// Weekday of a date, SUN = 1 through SAT = 7.
fn weekday_of(year: i32, month: u32, day: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("day bounded by days_in_month")
        .weekday()
        .num_days_from_sunday()
        + 1
}

fn last_weekday_of_month(year: i32, month: u32) -> u32 {
    let len = days_in_month(year, month);
    match weekday_of(year, month, len) {
        7 => len - 1,
        1 => len - 2,
        _ => len,
    }
}

/// Nearest weekday to the target day within the same month.
fn nearest_weekday(year: i32, month: u32, target: u32) -> u32 {
    let len = days_in_month(year, month);
    let day = target.min(len);
    match weekday_of(year, month, day) {
        7 => {
            if day > 1 {
                day - 1
            } else {
                day + 2
            }
        }
        1 => {
            if day < len {
                day + 1
            } else {
                day - 2
            }
        }
        _ => day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp")
    }

    fn fire_times(expr: &str, from: &str, tz: Tz, n: usize) -> Vec<DateTime<Utc>> {
        let e = CronExpression::parse(expr).expect("valid expression");
        let mut out = Vec::with_capacity(n);
        let mut cursor = utc(from);
        for _ in 0..n {
            match e.next_after(cursor, tz) {
                Some(t) => {
                    out.push(t);
                    cursor = t;
                }
                None => break,
            }
        }
        out
    }

    // ── basic evaluation ──────────────────────────────────────────────────────

    #[test]
    fn weekday_mornings_skip_the_weekend() {
        let times = fire_times("0 15 10 ? * MON-FRI", "2024-01-01T00:00:00Z", Tz::UTC, 6);
        let expected = [
            "2024-01-01T10:15:00Z",
            "2024-01-02T10:15:00Z",
            "2024-01-03T10:15:00Z",
            "2024-01-04T10:15:00Z",
            "2024-01-05T10:15:00Z",
            "2024-01-08T10:15:00Z",
        ];
        let expected: Vec<DateTime<Utc>> = expected.iter().map(|s| utc(s)).collect();
        assert_eq!(times, expected, "Sat/Sun must be skipped");
    }

    #[test]
    fn last_friday_of_month() {
        let times = fire_times("0 15 10 ? * 6L", "2024-01-01T00:00:00Z", Tz::UTC, 3);
        assert_eq!(times[0], utc("2024-01-26T10:15:00Z"));
        assert_eq!(times[1], utc("2024-02-23T10:15:00Z"));
        assert_eq!(times[2], utc("2024-03-29T10:15:00Z"));
    }

    #[test]
    fn every_second_advances_by_one() {
        let times = fire_times("* * * * * ?", "2024-06-01T12:00:00Z", Tz::UTC, 3);
        assert_eq!(times[0], utc("2024-06-01T12:00:01Z"));
        assert_eq!(times[1], utc("2024-06-01T12:00:02Z"));
        assert_eq!(times[2], utc("2024-06-01T12:00:03Z"));
    }

    #[test]
    fn next_is_strictly_after_input() {
        let e = CronExpression::parse("0 0 12 * * ?").unwrap();
        let exactly_noon = utc("2024-06-01T12:00:00Z");
        let next = e.next_after(exactly_noon, Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-06-02T12:00:00Z"));
    }

    #[test]
    fn minute_steps() {
        let times = fire_times("0 */20 * * * ?", "2024-06-01T00:05:00Z", Tz::UTC, 3);
        assert_eq!(times[0], utc("2024-06-01T00:20:00Z"));
        assert_eq!(times[1], utc("2024-06-01T00:40:00Z"));
        assert_eq!(times[2], utc("2024-06-01T01:00:00Z"));
    }

    #[test]
    fn month_rollover_resets_lower_fields() {
        let times = fire_times("0 30 8 1 * ?", "2024-01-15T00:00:00Z", Tz::UTC, 2);
        assert_eq!(times[0], utc("2024-02-01T08:30:00Z"));
        assert_eq!(times[1], utc("2024-03-01T08:30:00Z"));
    }

    #[test]
    fn year_rollover() {
        let times = fire_times("0 0 0 1 JAN ?", "2024-06-01T00:00:00Z", Tz::UTC, 2);
        assert_eq!(times[0], utc("2025-01-01T00:00:00Z"));
        assert_eq!(times[1], utc("2026-01-01T00:00:00Z"));
    }

    // ── day-of-month specials ─────────────────────────────────────────────────

    #[test]
    fn last_day_of_month_tracks_month_length() {
        let times = fire_times("0 0 0 L * ?", "2024-01-01T00:00:00Z", Tz::UTC, 3);
        assert_eq!(times[0], utc("2024-01-31T00:00:00Z"));
        assert_eq!(times[1], utc("2024-02-29T00:00:00Z"), "2024 is a leap year");
        assert_eq!(times[2], utc("2024-03-31T00:00:00Z"));
    }

    #[test]
    fn last_weekday_of_month() {
        // 2024-03-31 is a Sunday, so LW lands on Friday the 29th.
        let times = fire_times("0 0 0 LW * ?", "2024-03-01T00:00:00Z", Tz::UTC, 1);
        assert_eq!(times[0], utc("2024-03-29T00:00:00Z"));
    }

    #[test]
    fn nearest_weekday_does_not_cross_month() {
        // 2024-06-01 is a Saturday; 1W must move forward to Monday the 3rd,
        // not back into May.
        let times = fire_times("0 0 0 1W * ?", "2024-05-20T00:00:00Z", Tz::UTC, 1);
        assert_eq!(times[0], utc("2024-06-03T00:00:00Z"));
    }

    #[test]
    fn nearest_weekday_moves_saturday_back() {
        // 2024-06-15 is a Saturday; 15W fires on Friday the 14th.
        let times = fire_times("0 0 0 15W 6 ?", "2024-06-01T00:00:00Z", Tz::UTC, 1);
        assert_eq!(times[0], utc("2024-06-14T00:00:00Z"));
    }

    // ── day-of-week specials ──────────────────────────────────────────────────

    #[test]
    fn nth_weekday_of_month() {
        // Third Monday of January 2024 is the 15th.
        let times = fire_times("0 0 9 ? * MON#3", "2024-01-01T00:00:00Z", Tz::UTC, 1);
        assert_eq!(times[0], utc("2024-01-15T09:00:00Z"));
    }

    #[test]
    fn fifth_occurrence_skips_short_months() {
        // Five Fridays in March 2024 (1, 8, 15, 22, 29); April has only four,
        // so the next match after March is in May (31st).
        let times = fire_times("0 0 0 ? * 6#5", "2024-03-01T00:00:00Z", Tz::UTC, 2);
        assert_eq!(times[0], utc("2024-03-29T00:00:00Z"));
        assert_eq!(times[1], utc("2024-05-31T00:00:00Z"));
    }

    // ── dom/dow interaction ───────────────────────────────────────────────────

    #[test]
    fn concrete_dom_and_dow_intersect() {
        // Fires only when the 13th is a Friday. First such after 2024-01-01
        // is 2024-09-13, then 2024-12-13.
        let times = fire_times("0 0 0 13 * 6", "2024-01-01T00:00:00Z", Tz::UTC, 2);
        assert_eq!(times[0], utc("2024-09-13T00:00:00Z"));
        assert_eq!(times[1], utc("2024-12-13T00:00:00Z"));
    }

    #[test]
    fn star_dom_with_concrete_dow_behaves_like_unspecified() {
        let a = fire_times("0 15 10 * * MON-FRI", "2024-01-01T00:00:00Z", Tz::UTC, 5);
        let b = fire_times("0 15 10 ? * MON-FRI", "2024-01-01T00:00:00Z", Tz::UTC, 5);
        assert_eq!(a, b);
    }

    // ── year field ────────────────────────────────────────────────────────────

    #[test]
    fn year_set_exhaustion_yields_none() {
        let e = CronExpression::parse("0 0 0 1 1 ? 2025").unwrap();
        let first = e.next_after(utc("2024-01-01T00:00:00Z"), Tz::UTC);
        assert_eq!(first, Some(utc("2025-01-01T00:00:00Z")));
        let none = e.next_after(utc("2025-06-01T00:00:00Z"), Tz::UTC);
        assert_eq!(none, None, "no fire times remain after the year set");
    }

    // ── time zones and DST ────────────────────────────────────────────────────

    #[test]
    fn evaluation_uses_the_given_zone() {
        // 08:00 in New York is 13:00 UTC in winter (EST, UTC-5).
        let times = fire_times(
            "0 0 8 * * ?",
            "2024-01-10T00:00:00Z",
            chrono_tz::America::New_York,
            1,
        );
        assert_eq!(times[0], utc("2024-01-10T13:00:00Z"));
    }

    #[test]
    fn spring_forward_gap_advances_to_next_existing_instant() {
        // 2024-03-10 02:30 does not exist in New York; the 02:00-03:00 hour
        // is skipped, so the fire resolves to 03:00 EDT (07:00 UTC).
        let times = fire_times(
            "0 30 2 10 3 ?",
            "2024-03-09T12:00:00Z",
            chrono_tz::America::New_York,
            1,
        );
        assert_eq!(times[0], utc("2024-03-10T07:00:00Z"));
    }

    #[test]
    fn fall_back_overlap_picks_earlier_occurrence() {
        // 2024-11-03 01:30 occurs twice in New York; the EDT occurrence
        // (05:30 UTC) comes first.
        let times = fire_times(
            "0 30 1 3 11 ?",
            "2024-11-02T12:00:00Z",
            chrono_tz::America::New_York,
            1,
        );
        assert_eq!(times[0], utc("2024-11-03T05:30:00Z"));
    }

    // ── final fire time ───────────────────────────────────────────────────────

    #[test]
    fn final_fire_time_is_last_match_within_bounds() {
        let e = CronExpression::parse("0 0 12 * * ?").unwrap();
        let last = e
            .final_fire_time_between(
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-05T13:00:00Z"),
                Tz::UTC,
            )
            .unwrap();
        assert_eq!(last, utc("2024-01-05T12:00:00Z"));
    }

    #[test]
    fn final_fire_time_none_when_interval_has_no_match() {
        let e = CronExpression::parse("0 0 12 1 1 ?").unwrap();
        let last = e.final_fire_time_between(
            utc("2024-02-01T00:00:00Z"),
            utc("2024-02-02T00:00:00Z"),
            Tz::UTC,
        );
        assert_eq!(last, None);
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn six_and_seven_fields_parse() {
        assert!(CronExpression::parse("0 0 12 * * ?").is_ok());
        assert!(CronExpression::parse("0 0 12 * * ? 2099").is_ok());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(CronExpression::parse("0 0 12 * *").is_err());
        assert!(CronExpression::parse("0 0 12 * * ? 2099 extra").is_err());
    }

    #[test]
    fn double_question_mark_is_rejected() {
        let err = CronExpression::parse("0 0 12 ? * ?").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedCombination { .. }));
    }

    #[test]
    fn parse_error_reports_field_position() {
        let err = CronExpression::parse("0 0 25 * * ?").unwrap_err();
        assert_eq!(err.position(), 4, "error should point at the hour field");
    }

    #[test]
    fn display_round_trips_source() {
        let e = CronExpression::parse("0 15 10 ? * 6L").unwrap();
        assert_eq!(e.to_string(), "0 15 10 ? * 6L");
    }
}
