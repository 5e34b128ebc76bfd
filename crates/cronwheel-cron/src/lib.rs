//! # cronwheel-cron
//!
//! Cron expression parsing and time-zone-aware fire-time evaluation for the
//! cronwheel scheduling engine.
//!
//! Expressions use seven fields — `seconds minutes hours day-of-month month
//! day-of-week [year]` — with `JAN`–`DEC` / `SUN`–`SAT` names (SUN = 1),
//! ranges, steps, and the day markers `L`, `LW`, `NW`, `NL` and `N#M`.
//!
//! ## Quick start
//!
//! ```rust
//! use cronwheel_cron::CronExpression;
//! use chrono_tz::Tz;
//!
//! // 10:15 every weekday morning
//! let expr = CronExpression::parse("0 15 10 ? * MON-FRI").unwrap();
//! let after = "2024-01-01T00:00:00Z".parse().unwrap();
//! let next = expr.next_after(after, Tz::UTC).unwrap();
//! assert_eq!(next.to_rfc3339(), "2024-01-01T10:15:00+00:00");
//! ```
//!
//! Day-of-month and day-of-week interact: `?` in one field leaves the other
//! in sole control, and when both are concrete the expression fires only at
//! instants satisfying both.

pub mod error;
mod expr;
mod field;

pub use error::{ParseError, Result};
pub use expr::CronExpression;
