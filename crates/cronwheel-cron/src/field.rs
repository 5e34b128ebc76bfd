//! Per-field value sets for a parsed cron expression.

use std::collections::BTreeSet;

use crate::error::{ParseError, Result};

pub(crate) const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Day-of-week names, SUN = 1 through SAT = 7.
pub(crate) const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A resolved set of allowed values for one numeric cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldSpec {
    values: BTreeSet<u32>,
}

impl FieldSpec {
    pub(crate) fn all(min: u32, max: u32) -> Self {
        Self {
            values: (min..=max).collect(),
        }
    }

    pub(crate) fn from_values(values: BTreeSet<u32>) -> Self {
        Self { values }
    }

    pub(crate) fn contains(&self, v: u32) -> bool {
        self.values.contains(&v)
    }

    /// Smallest allowed value `>= v`, if any.
    pub(crate) fn next_from(&self, v: u32) -> Option<u32> {
        self.values.range(v..).next().copied()
    }

}

/// Day-of-month field. `*` carries no constraint so that day-of-week
/// specifications can apply on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DomSpec {
    /// `?` — no specific value.
    Unspecified,
    /// `*`
    All,
    Days(BTreeSet<u32>),
    /// `L` — last day of the month.
    LastDay,
    /// `LW` — last weekday of the month.
    LastWeekday,
    /// `NW` — nearest weekday to day N, not crossing the month boundary.
    NearestWeekday(u32),
}

/// Day-of-week field, SUN = 1 through SAT = 7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DowSpec {
    /// `?` — no specific value.
    Unspecified,
    /// `*`
    All,
    Days(BTreeSet<u32>),
    /// `NL` — last weekday N of the month.
    LastOfMonth(u32),
    /// `N#M` — the Mth occurrence of weekday N in the month.
    Nth { weekday: u32, nth: u32 },
}

/// Parse a numeric value or a three-letter name from `names`.
fn parse_value(tok: &str, pos: usize, names: Option<(&[&str], u32)>) -> Result<u32> {
    if let Ok(v) = tok.parse::<u32>() {
        return Ok(v);
    }
    if let Some((names, base)) = names {
        for (i, name) in names.iter().enumerate() {
            if tok.eq_ignore_ascii_case(name) {
                return Ok(base + i as u32);
            }
        }
    }
    Err(ParseError::invalid(pos, format!("unrecognized value '{tok}'")))
}

/// Parse a comma-separated list of `*`, `N`, `N-M`, `N/S`, `*/S`, `N-M/S`
/// terms into the set of allowed values.
pub(crate) fn parse_set(
    text: &str,
    pos: usize,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for term in text.split(',') {
        if term.is_empty() {
            return Err(ParseError::invalid(pos, "empty list term"));
        }
        let (range_part, step) = match term.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| ParseError::invalid(pos, format!("invalid step '{s}'")))?;
                if step == 0 {
                    return Err(ParseError::invalid(pos, "step must be >= 1"));
                }
                (r, step)
            }
            None => (term, 1),
        };
        let stepped = term.contains('/');
        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (parse_value(a, pos, names)?, parse_value(b, pos, names)?)
        } else {
            let v = parse_value(range_part, pos, names)?;
            // `N/S` runs from N to the field maximum; bare `N` is a single value.
            if stepped {
                (v, max)
            } else {
                (v, v)
            }
        };
        if lo < min || lo > max || hi < min || hi > max {
            return Err(ParseError::invalid(
                pos,
                format!("value out of range {min}-{max} in '{term}'"),
            ));
        }
        // Wrap-around ranges (e.g. FRI-MON) run to the maximum and resume
        // from the minimum.
        let seq: Vec<u32> = if lo <= hi {
            (lo..=hi).collect()
        } else {
            (lo..=max).chain(min..=hi).collect()
        };
        values.extend(seq.into_iter().step_by(step as usize));
    }
    if values.is_empty() {
        return Err(ParseError::invalid(pos, "field matches no values"));
    }
    Ok(values)
}

/// Parse a plain numeric field (seconds, minutes, hours, month, year).
pub(crate) fn parse_numeric_field(
    text: &str,
    pos: usize,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<FieldSpec> {
    if text == "*" {
        return Ok(FieldSpec::all(min, max));
    }
    Ok(FieldSpec::from_values(parse_set(text, pos, min, max, names)?))
}

pub(crate) fn parse_dom(text: &str, pos: usize) -> Result<DomSpec> {
    match text {
        "?" => return Ok(DomSpec::Unspecified),
        "*" => return Ok(DomSpec::All),
        "L" => return Ok(DomSpec::LastDay),
        "LW" => return Ok(DomSpec::LastWeekday),
        _ => {}
    }
    if let Some(day) = text.strip_suffix('W') {
        let n: u32 = day.parse().map_err(|_| {
            ParseError::invalid(pos, format!("invalid day-of-month '{text}'"))
        })?;
        if !(1..=31).contains(&n) {
            return Err(ParseError::invalid(pos, "day-of-month must be 1-31"));
        }
        return Ok(DomSpec::NearestWeekday(n));
    }
    if text.contains(['L', 'W']) {
        return Err(ParseError::unsupported(
            pos,
            "'L' and 'W' must be the only term in the day-of-month field",
        ));
    }
    Ok(DomSpec::Days(parse_set(text, pos, 1, 31, None)?))
}

pub(crate) fn parse_dow(text: &str, pos: usize) -> Result<DowSpec> {
    match text {
        "?" => return Ok(DowSpec::Unspecified),
        "*" => return Ok(DowSpec::All),
        _ => {}
    }
    let names = Some((&DAY_NAMES[..], 1));
    if let Some(day) = text.strip_suffix('L') {
        if day.contains(',') {
            return Err(ParseError::unsupported(
                pos,
                "'L' must be the only term in the day-of-week field",
            ));
        }
        let w = parse_value(day, pos, names)?;
        if !(1..=7).contains(&w) {
            return Err(ParseError::invalid(pos, "day-of-week must be 1-7"));
        }
        return Ok(DowSpec::LastOfMonth(w));
    }
    if let Some((day, nth)) = text.split_once('#') {
        if day.contains(',') || nth.contains(',') {
            return Err(ParseError::unsupported(
                pos,
                "'#' must be the only term in the day-of-week field",
            ));
        }
        let weekday = parse_value(day, pos, names)?;
        let nth: u32 = nth
            .parse()
            .map_err(|_| ParseError::invalid(pos, format!("invalid '#' ordinal '{nth}'")))?;
        if !(1..=7).contains(&weekday) {
            return Err(ParseError::invalid(pos, "day-of-week must be 1-7"));
        }
        if !(1..=5).contains(&nth) {
            return Err(ParseError::invalid(pos, "'#' ordinal must be 1-5"));
        }
        return Ok(DowSpec::Nth { weekday, nth });
    }
    if text.contains('L') {
        return Err(ParseError::unsupported(
            pos,
            "'L' must be the only term in the day-of-week field",
        ));
    }
    Ok(DowSpec::Days(parse_set(text, pos, 1, 7, names)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_covers_whole_range() {
        let f = parse_numeric_field("*", 0, 0, 59, None).unwrap();
        assert!(f.contains(0) && f.contains(30) && f.contains(59));
    }

    #[test]
    fn single_value_and_list() {
        let f = parse_numeric_field("5,10,15", 0, 0, 59, None).unwrap();
        assert!(f.contains(5) && f.contains(10) && f.contains(15));
        assert!(!f.contains(6));
    }

    #[test]
    fn range_is_inclusive() {
        let f = parse_numeric_field("10-12", 0, 0, 59, None).unwrap();
        assert_eq!(f.next_from(0), Some(10));
        assert!(f.contains(12));
        assert_eq!(f.next_from(13), None);
    }

    #[test]
    fn step_from_star_starts_at_minimum() {
        let f = parse_numeric_field("*/15", 0, 0, 59, None).unwrap();
        assert!(f.contains(0) && f.contains(15) && f.contains(30) && f.contains(45));
        assert!(!f.contains(5));
    }

    #[test]
    fn step_from_value_runs_to_maximum() {
        let f = parse_numeric_field("3/10", 0, 0, 59, None).unwrap();
        assert!(f.contains(3) && f.contains(13) && f.contains(53));
        assert!(!f.contains(0));
    }

    #[test]
    fn stepped_range_stays_inside_range() {
        let f = parse_numeric_field("10-30/10", 0, 0, 59, None).unwrap();
        assert!(f.contains(10) && f.contains(20) && f.contains(30));
        assert!(!f.contains(40));
    }

    #[test]
    fn month_names_resolve() {
        let f = parse_numeric_field("JAN,DEC", 0, 1, 12, Some((&MONTH_NAMES, 1))).unwrap();
        assert!(f.contains(1) && f.contains(12));
    }

    #[test]
    fn day_name_range_resolves() {
        let set = parse_set("MON-FRI", 0, 1, 7, Some((&DAY_NAMES, 1))).unwrap();
        assert_eq!(set, (2..=6).collect());
    }

    #[test]
    fn wraparound_range_resumes_at_minimum() {
        let set = parse_set("FRI-MON", 0, 1, 7, Some((&DAY_NAMES, 1))).unwrap();
        assert_eq!(set, [6, 7, 1, 2].into_iter().collect());
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        assert!(parse_numeric_field("60", 0, 0, 59, None).is_err());
        assert!(parse_numeric_field("0-60", 0, 0, 59, None).is_err());
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(parse_numeric_field("*/0", 0, 0, 59, None).is_err());
    }

    #[test]
    fn dom_special_terms() {
        assert_eq!(parse_dom("L", 0).unwrap(), DomSpec::LastDay);
        assert_eq!(parse_dom("LW", 0).unwrap(), DomSpec::LastWeekday);
        assert_eq!(parse_dom("15W", 0).unwrap(), DomSpec::NearestWeekday(15));
        assert_eq!(parse_dom("?", 0).unwrap(), DomSpec::Unspecified);
    }

    #[test]
    fn dom_marker_in_list_is_unsupported() {
        let err = parse_dom("1,L", 0).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedCombination { .. }));
    }

    #[test]
    fn dow_last_and_nth() {
        assert_eq!(parse_dow("6L", 0).unwrap(), DowSpec::LastOfMonth(6));
        assert_eq!(parse_dow("FRIL", 0).unwrap(), DowSpec::LastOfMonth(6));
        assert_eq!(
            parse_dow("2#3", 0).unwrap(),
            DowSpec::Nth { weekday: 2, nth: 3 }
        );
    }

    #[test]
    fn dow_nth_ordinal_bounds() {
        assert!(parse_dow("2#0", 0).is_err());
        assert!(parse_dow("2#6", 0).is_err());
    }

    #[test]
    fn dow_marker_in_list_is_unsupported() {
        let err = parse_dow("1,6L", 0).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedCombination { .. }));
    }
}
