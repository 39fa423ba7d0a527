//! Validation rule engine.
//!
//! Each rule is a stateless unit identified by a stable string code; the
//! [`RuleRegistry`] feeds every rule the same decoded snapshot and collects
//! the violations into one flat list. Violations are the engine's output,
//! not errors: a poll that produces ten violations is a successful poll
//! reporting ten findings.

pub mod stop_time_updates;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::feed::FeedMessage;
use crate::schedule::{ScheduleIndex, ScheduleMetadata};
use stop_time_updates::StopTimeUpdateValidator;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Stable rule identifiers.
///
/// These codes are the contract external consumers (dashboards, test
/// suites) depend on; they must not be renumbered across versions without a
/// migration note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleCode {
    /// stop_time_updates not sorted by increasing stop_sequence.
    E002,
    /// Sequential stop_time_updates have the same stop_sequence.
    E036,
    /// Sequential stop_time_updates have the same stop_id.
    E037,
    /// stop_time_update has neither stop_id nor stop_sequence.
    E040,
    /// Trip has no stop_time_updates and is not canceled.
    E041,
    /// Arrival or departure provided for a NO_DATA stop_time_update.
    E042,
    /// stop_time_update has neither arrival nor departure.
    E043,
    /// Arrival/departure event carries neither delay nor time.
    E044,
    /// stop_sequence and stop_id pairing does not match the static schedule.
    E045,
}

impl RuleCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleCode::E002 => "E002",
            RuleCode::E036 => "E036",
            RuleCode::E037 => "E037",
            RuleCode::E040 => "E040",
            RuleCode::E041 => "E041",
            RuleCode::E042 => "E042",
            RuleCode::E043 => "E043",
            RuleCode::E044 => "E044",
            RuleCode::E045 => "E045",
        }
    }

    pub fn severity(self) -> Severity {
        // Every rule implemented so far is an error; the warning space
        // (W001..) dispatches through the same registry.
        Severity::Error
    }

    pub fn title(self) -> &'static str {
        match self {
            RuleCode::E002 => "stop_time_updates not sorted by stop_sequence",
            RuleCode::E036 => "sequential stop_time_updates have the same stop_sequence",
            RuleCode::E037 => "sequential stop_time_updates have the same stop_id",
            RuleCode::E040 => "stop_time_update doesn't contain stop_id or stop_sequence",
            RuleCode::E041 => "trip doesn't have any stop_time_updates",
            RuleCode::E042 => "arrival or departure provided for NO_DATA stop_time_update",
            RuleCode::E043 => "stop_time_update doesn't have arrival or departure",
            RuleCode::E044 => "stop_time_update arrival/departure doesn't have delay or time",
            RuleCode::E045 => "stop_time_update stop_sequence and stop_id do not match GTFS",
        }
    }
}

impl fmt::Display for RuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected defect, with enough context to locate the offending entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleViolation {
    pub code: RuleCode,
    pub severity: Severity,
    pub trip_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub detail: String,
}

impl RuleViolation {
    pub fn new(code: RuleCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            trip_id: None,
            stop_sequence: None,
            stop_id: None,
            detail: detail.into(),
        }
    }

    pub fn for_trip(mut self, trip_id: Option<&str>) -> Self {
        self.trip_id = trip_id.map(str::to_string);
        self
    }

    pub fn at_stop(mut self, stop_sequence: Option<u32>, stop_id: Option<&str>) -> Self {
        self.stop_sequence = stop_sequence;
        self.stop_id = stop_id.map(str::to_string);
        self
    }
}

/// A stateless unit of validation logic.
///
/// `evaluate` is a pure function of its inputs: no snapshot mutation, no
/// I/O, no per-call state. Malformed-but-decodable input is the condition a
/// rule reports, never a reason to fail. `previous` carries the prior poll
/// of the same source for rules that compare successive snapshots; the
/// first poll of a source has no predecessor.
pub trait Rule: Send + Sync {
    fn evaluate(
        &self,
        as_of: u64,
        schedule: &dyn ScheduleIndex,
        metadata: &ScheduleMetadata,
        feed: &FeedMessage,
        previous: Option<&FeedMessage>,
    ) -> Vec<RuleViolation>;
}

/// Fixed ordered collection of rules, invoked uniformly.
///
/// Adding a rule means adding one value here, not touching the dispatch.
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self {
            rules: vec![Box::new(StopTimeUpdateValidator)],
        }
    }
}

impl RuleRegistry {
    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Runs every rule against the snapshot and concatenates the results.
    pub fn evaluate(
        &self,
        as_of: u64,
        schedule: &dyn ScheduleIndex,
        metadata: &ScheduleMetadata,
        feed: &FeedMessage,
        previous: Option<&FeedMessage>,
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            violations.extend(rule.evaluate(as_of, schedule, metadata, feed, previous));
        }
        violations
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Counts occurrences per rule code. Consumers assert against these counts
/// rather than against the order of the flat list.
pub fn count_by_code(violations: &[RuleViolation]) -> HashMap<RuleCode, usize> {
    let mut counts = HashMap::new();
    for v in violations {
        *counts.entry(v.code).or_insert(0) += 1;
    }
    counts
}
