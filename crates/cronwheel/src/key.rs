//! Keyed identity for jobs and triggers.
//!
//! Keys are `(name, group)` pairs; the group defaults to [`DEFAULT_GROUP`].
//! Uniqueness is per kind: a job and a trigger may share the same name and
//! group without conflict.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Group used when none is given.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Group of one-shot triggers created by ad-hoc job firing.
pub const MANUAL_TRIGGER_GROUP: &str = "MANUAL_TRIGGER";

/// Group reserved for triggers recovered after a non-clean shutdown.
pub const RECOVERING_JOBS_GROUP: &str = "RECOVERING_JOBS";

/// Group reserved for triggers taken over from a failed instance.
pub const FAILED_OVER_JOBS_GROUP: &str = "FAILED_OVER_JOBS";

/// Groups clients may not register triggers into.
pub const RESERVED_GROUPS: [&str; 3] = [
    MANUAL_TRIGGER_GROUP,
    RECOVERING_JOBS_GROUP,
    FAILED_OVER_JOBS_GROUP,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    name: String,
    group: String,
}

impl JobKey {
    /// Key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    pub fn grouped(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.group.is_empty()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    name: String,
    group: String,
}

impl TriggerKey {
    /// Key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    pub fn grouped(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.group.is_empty()
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}
