// SPDX-License-Identifier: MIT

//! Clinical record boundary
//!
//! States append clinical facts and conditions query them through the
//! [`ClinicalRecord`] trait. Export and filtering of the record live outside
//! this crate; [`HealthRecord`] is the in-memory implementation used by the
//! simulator and tests.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use super::time::Time;

/// Kinds of clinical fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Encounter,
    Condition,
    Allergy,
    Medication,
    CarePlan,
    Procedure,
    Observation,
    Death,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Encounter => "encounter",
            RecordKind::Condition => "condition",
            RecordKind::Allergy => "allergy",
            RecordKind::Medication => "medication",
            RecordKind::CarePlan => "careplan",
            RecordKind::Procedure => "procedure",
            RecordKind::Observation => "observation",
            RecordKind::Death => "death",
        };
        f.write_str(s)
    }
}

/// Whether an event opens, closes, or is a one-off fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Start,
    Stop,
    Record,
}

/// One appended clinical fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordEvent {
    pub kind: RecordKind,
    pub action: RecordAction,
    pub time: Time,
    pub code: String,
    /// Free-form details: `value`, `unit`, `reason`, `display`, ...
    pub payload: Map<String, Value>,
}

impl RecordEvent {
    pub fn new(kind: RecordKind, action: RecordAction, time: Time, code: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            time,
            code: code.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn value(&self) -> Option<&Value> {
        self.payload.get("value")
    }
}

/// Narrow interface between the framework and an individual's record
pub trait ClinicalRecord: Send {
    /// Append a fact. Records are never rewritten.
    fn append(&mut self, event: RecordEvent);

    /// Whether a `Start` for this code is currently open
    fn is_active(&self, kind: RecordKind, code: &str) -> bool;

    /// Value of the most recent `Record` event for this code
    fn latest_value(&self, kind: RecordKind, code: &str) -> Option<&Value>;

    /// Whether any event of this kind was ever recorded for this code
    fn has_recorded(&self, kind: RecordKind, code: &str) -> bool;

    /// All events in append order
    fn events(&self) -> &[RecordEvent];
}

/// In-memory clinical record
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    events: Vec<RecordEvent>,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent event for this code that satisfies `pred`
    fn last_matching(
        &self,
        kind: RecordKind,
        code: &str,
        pred: impl Fn(&RecordEvent) -> bool,
    ) -> Option<&RecordEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.code == code && pred(*e))
    }
}

impl ClinicalRecord for HealthRecord {
    fn append(&mut self, event: RecordEvent) {
        log::debug!(
            "record {:?} {} '{}' at {}",
            event.action,
            event.kind,
            event.code,
            event.time
        );
        self.events.push(event);
    }

    fn is_active(&self, kind: RecordKind, code: &str) -> bool {
        self.last_matching(kind, code, |e| e.action != RecordAction::Record)
            .is_some_and(|e| e.action == RecordAction::Start)
    }

    fn latest_value(&self, kind: RecordKind, code: &str) -> Option<&Value> {
        self.last_matching(kind, code, |e| e.action == RecordAction::Record)
            .and_then(|e| e.value())
    }

    fn has_recorded(&self, kind: RecordKind, code: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind && e.code == code)
    }

    fn events(&self) -> &[RecordEvent] {
        &self.events
    }
}
