// SPDX-License-Identifier: MIT

//! State variants, their field metadata and their parser

use serde_json::Value;

use crate::gmf::workflow::condition::{self, Condition, CONDITION};
use crate::gmf::workflow::schema::{FieldKind, FieldMeta, Reader, Requirement, TypeMeta};
use crate::gmf::workflow::transition::{self, Transition, FIELDS};
use crate::gmf::workflow::types::{Amount, Code, Timespan};
use crate::sim::{RecordKind, ValidationError};

/// Document discriminators (`type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateType {
    Initial,
    Terminal,
    Simple,
    Guard,
    Delay,
    SetAttribute,
    Counter,
    CallSubmodule,
    Encounter,
    EncounterEnd,
    ConditionOnset,
    ConditionEnd,
    AllergyOnset,
    AllergyEnd,
    MedicationOrder,
    MedicationEnd,
    CarePlanStart,
    CarePlanEnd,
    Procedure,
    Observation,
    VitalSign,
    Symptom,
    Death,
}

impl StateType {
    pub const ALL: [StateType; 23] = [
        StateType::Initial,
        StateType::Terminal,
        StateType::Simple,
        StateType::Guard,
        StateType::Delay,
        StateType::SetAttribute,
        StateType::Counter,
        StateType::CallSubmodule,
        StateType::Encounter,
        StateType::EncounterEnd,
        StateType::ConditionOnset,
        StateType::ConditionEnd,
        StateType::AllergyOnset,
        StateType::AllergyEnd,
        StateType::MedicationOrder,
        StateType::MedicationEnd,
        StateType::CarePlanStart,
        StateType::CarePlanEnd,
        StateType::Procedure,
        StateType::Observation,
        StateType::VitalSign,
        StateType::Symptom,
        StateType::Death,
    ];

    pub fn discriminator(self) -> &'static str {
        match self {
            StateType::Initial => "Initial",
            StateType::Terminal => "Terminal",
            StateType::Simple => "Simple",
            StateType::Guard => "Guard",
            StateType::Delay => "Delay",
            StateType::SetAttribute => "SetAttribute",
            StateType::Counter => "Counter",
            StateType::CallSubmodule => "CallSubmodule",
            StateType::Encounter => "Encounter",
            StateType::EncounterEnd => "EncounterEnd",
            StateType::ConditionOnset => "ConditionOnset",
            StateType::ConditionEnd => "ConditionEnd",
            StateType::AllergyOnset => "AllergyOnset",
            StateType::AllergyEnd => "AllergyEnd",
            StateType::MedicationOrder => "MedicationOrder",
            StateType::MedicationEnd => "MedicationEnd",
            StateType::CarePlanStart => "CarePlanStart",
            StateType::CarePlanEnd => "CarePlanEnd",
            StateType::Procedure => "Procedure",
            StateType::Observation => "Observation",
            StateType::VitalSign => "VitalSign",
            StateType::Symptom => "Symptom",
            StateType::Death => "Death",
        }
    }

    pub fn from_discriminator(text: &str) -> Option<StateType> {
        Self::ALL.into_iter().find(|t| t.discriminator() == text)
    }

    /// Field naming another state that must be of a given type
    pub fn reference_field(self) -> Option<(&'static str, StateType)> {
        match self {
            StateType::ConditionOnset | StateType::AllergyOnset => {
                Some(("target_encounter", StateType::Encounter))
            }
            StateType::ConditionEnd => Some(("condition_onset", StateType::ConditionOnset)),
            StateType::AllergyEnd => Some(("allergy_onset", StateType::AllergyOnset)),
            StateType::MedicationEnd => Some(("medication_order", StateType::MedicationOrder)),
            StateType::CarePlanEnd => Some(("careplan", StateType::CarePlanStart)),
            _ => None,
        }
    }

    pub fn metadata(self) -> TypeMeta {
        let text = |name| FieldMeta::optional(name, FieldKind::Text);
        let codes = |min| FieldMeta::many("codes", min, FieldKind::Nested("Code"));
        let exact = |key| FieldMeta::optional("exact", FieldKind::Nested(key));
        let range = |key| FieldMeta::optional("range", FieldKind::Nested(key));

        let mut meta = TypeMeta::new(self.discriminator())
            .field(FieldMeta::required("type", FieldKind::Text))
            .field(FieldMeta::optional("remarks", FieldKind::Any));
        for field in FIELDS {
            meta = meta.field(FieldMeta::optional(field, FieldKind::Any));
        }

        match self {
            StateType::Initial | StateType::Terminal | StateType::Simple => meta,
            StateType::Guard => meta.field(FieldMeta::required("allow", CONDITION)),
            StateType::Delay => meta
                .field(exact("TimedExact"))
                .field(range("TimedRange"))
                .requires(Requirement::any(&["range", "exact"])),
            StateType::SetAttribute => meta
                .field(FieldMeta::required("attribute", FieldKind::Text))
                .field(FieldMeta::optional("value", FieldKind::Any)),
            StateType::Counter => meta
                .field(FieldMeta::required("attribute", FieldKind::Text))
                .field(FieldMeta::required("action", FieldKind::Text)),
            StateType::CallSubmodule => {
                meta.field(FieldMeta::required("submodule", FieldKind::Text))
            }
            StateType::Encounter => meta
                .field(FieldMeta::optional("wellness", FieldKind::Bool))
                .field(codes(0))
                .field(text("encounter_class"))
                .field(text("reason"))
                .requires(Requirement::Any(vec![
                    Requirement::Field("wellness"),
                    Requirement::all(&["codes", "encounter_class"]),
                ])),
            StateType::EncounterEnd => meta.field(FieldMeta::optional(
                "discharge_disposition",
                FieldKind::Nested("Code"),
            )),
            StateType::ConditionOnset | StateType::AllergyOnset => meta
                .field(codes(1))
                .field(text("target_encounter"))
                .field(text("assign_to_attribute")),
            StateType::MedicationOrder => meta
                .field(codes(1))
                .field(text("reason"))
                .field(text("assign_to_attribute")),
            StateType::CarePlanStart => meta
                .field(codes(1))
                .field(FieldMeta::many("activities", 0, FieldKind::Nested("Code")))
                .field(text("reason"))
                .field(text("assign_to_attribute")),
            StateType::ConditionEnd
            | StateType::AllergyEnd
            | StateType::MedicationEnd
            | StateType::CarePlanEnd => {
                let (reference, _) = self.reference_field().unwrap_or(("", self));
                meta.field(text(reference))
                    .field(text("referenced_by_attribute"))
                    .field(codes(0))
                    .requires(Requirement::any(&[
                        reference,
                        "referenced_by_attribute",
                        "codes",
                    ]))
            }
            StateType::Procedure => meta
                .field(codes(1))
                .field(text("reason"))
                .field(FieldMeta::optional("duration", FieldKind::Nested("TimedRange"))),
            StateType::Observation => meta
                .field(codes(1))
                .field(text("unit"))
                .field(exact("Exact"))
                .field(range("Range"))
                .field(text("attribute"))
                .field(text("vital_sign"))
                .requires(Requirement::any(&["exact", "range", "attribute", "vital_sign"])),
            StateType::VitalSign => meta
                .field(FieldMeta::required("vital_sign", FieldKind::Text))
                .field(FieldMeta::required("unit", FieldKind::Text))
                .field(exact("Exact"))
                .field(range("Range"))
                .requires(Requirement::any(&["exact", "range"])),
            StateType::Symptom => meta
                .field(FieldMeta::required("symptom", FieldKind::Text))
                .field(text("cause"))
                .field(exact("Exact"))
                .field(range("Range"))
                .requires(Requirement::any(&["exact", "range"])),
            StateType::Death => meta
                .field(exact("TimedExact"))
                .field(range("TimedRange"))
                .field(codes(0)),
        }
    }
}

/// A state: its name, its variant payload and its outgoing transition
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub name: String,
    pub state_type: StateType,
    pub kind: StateKind,
    /// `None` ends the workflow after this state
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateKind {
    Initial,
    Terminal,
    Simple,
    Guard {
        allow: Condition,
    },
    Delay {
        wait: Timespan,
    },
    SetAttribute {
        attribute: String,
        value: Option<Value>,
    },
    Counter {
        attribute: String,
        increment: bool,
    },
    CallSubmodule {
        submodule: String,
    },
    Encounter(EncounterSpec),
    EncounterEnd {
        discharge_disposition: Option<Code>,
    },
    /// ConditionOnset, AllergyOnset, MedicationOrder, CarePlanStart
    Start(StartSpec),
    /// ConditionEnd, AllergyEnd, MedicationEnd, CarePlanEnd
    End(EndSpec),
    Procedure {
        codes: Vec<Code>,
        reason: Option<String>,
        duration: Option<Timespan>,
    },
    Observation {
        codes: Vec<Code>,
        unit: Option<String>,
        source: ObservationSource,
    },
    VitalSign {
        vital_sign: String,
        unit: String,
        amount: Amount,
    },
    Symptom {
        symptom: String,
        cause: Option<String>,
        amount: Amount,
    },
    Death {
        codes: Vec<Code>,
        delay: Option<Timespan>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncounterSpec {
    pub wellness: bool,
    pub codes: Vec<Code>,
    pub encounter_class: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartSpec {
    pub record: RecordKind,
    pub codes: Vec<Code>,
    pub target_encounter: Option<String>,
    pub assign_to_attribute: Option<String>,
    pub reason: Option<String>,
    pub activities: Vec<Code>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndSpec {
    pub record: RecordKind,
    pub reference: EndRef,
}

/// What an end state closes
#[derive(Debug, Clone, PartialEq)]
pub enum EndRef {
    /// The fact started by another state of the same module
    State(String),
    /// The code held in a person attribute
    Attribute(String),
    Codes(Vec<Code>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObservationSource {
    Amount(Amount),
    Attribute(String),
    VitalSign(String),
}

impl State {
    /// Parse one state node. Returns `None` if any error was pushed.
    pub fn parse(name: &str, value: &Value, errors: &mut Vec<ValidationError>) -> Option<State> {
        let before = errors.len();
        let (r, discriminator) = Reader::open_polymorphic(value, "State", "type", name, errors)?;
        let state_type = StateType::from_discriminator(discriminator)?;

        let kind = parse_kind(state_type, &r, errors);
        let transition = transition::parse(&r, errors);
        if errors.len() > before {
            return None;
        }
        Some(State {
            name: name.to_string(),
            state_type,
            kind: kind?,
            transition,
        })
    }

    /// `(field, referenced state, expected type)` for each back-reference
    pub fn back_references(&self) -> Vec<(&'static str, &str, StateType)> {
        let Some((field, expected)) = self.state_type.reference_field() else {
            return Vec::new();
        };
        let target = match &self.kind {
            StateKind::Start(spec) => spec.target_encounter.as_deref(),
            StateKind::End(EndSpec {
                reference: EndRef::State(name),
                ..
            }) => Some(name.as_str()),
            _ => None,
        };
        target.map(|t| vec![(field, t, expected)]).unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.state_type == StateType::Terminal || self.transition.is_none()
    }
}

fn parse_kind(
    state_type: StateType,
    r: &Reader<'_>,
    errors: &mut Vec<ValidationError>,
) -> Option<StateKind> {
    let kind = match state_type {
        StateType::Initial => StateKind::Initial,
        StateType::Terminal => StateKind::Terminal,
        StateType::Simple => StateKind::Simple,
        StateType::Guard => StateKind::Guard {
            allow: condition::parse(r.raw("allow")?, r.child("allow"), errors)?,
        },
        StateType::Delay => StateKind::Delay {
            wait: Timespan::parse(r, errors)?,
        },
        StateType::SetAttribute => StateKind::SetAttribute {
            attribute: r.text("attribute")?,
            value: r.raw("value").cloned(),
        },
        StateType::Counter => {
            let action = r.text("action")?;
            let increment = match action.as_str() {
                "increment" => true,
                "decrement" => false,
                other => {
                    r.error(errors, format!("Unknown counter action '{}'", other));
                    return None;
                }
            };
            StateKind::Counter {
                attribute: r.text("attribute")?,
                increment,
            }
        }
        StateType::CallSubmodule => StateKind::CallSubmodule {
            submodule: r.text("submodule")?,
        },
        StateType::Encounter => {
            let wellness = r.boolean("wellness").unwrap_or(false);
            // an explicit `wellness: false` satisfies the presence check only
            if !wellness && r.has("wellness") && !(r.has("codes") && r.has("encounter_class")) {
                r.error(
                    errors,
                    "Required (codes and encounter_class) when 'wellness' is false",
                );
                return None;
            }
            StateKind::Encounter(EncounterSpec {
                wellness,
                codes: Code::parse_list(r, "codes", errors),
                encounter_class: r.text("encounter_class"),
                reason: r.text("reason"),
            })
        }
        StateType::EncounterEnd => StateKind::EncounterEnd {
            discharge_disposition: match r.raw("discharge_disposition") {
                Some(v) => Some(Code::parse(v, r.child("discharge_disposition"), errors)?),
                None => None,
            },
        },
        StateType::ConditionOnset
        | StateType::AllergyOnset
        | StateType::MedicationOrder
        | StateType::CarePlanStart => StateKind::Start(StartSpec {
            record: record_kind(state_type),
            codes: Code::parse_list(r, "codes", errors),
            target_encounter: r.text("target_encounter"),
            assign_to_attribute: r.text("assign_to_attribute"),
            reason: r.text("reason"),
            activities: Code::parse_list(r, "activities", errors),
        }),
        StateType::ConditionEnd
        | StateType::AllergyEnd
        | StateType::MedicationEnd
        | StateType::CarePlanEnd => {
            let field = state_type.reference_field().map(|(f, _)| f)?;
            let reference = if let Some(name) = r.text(field) {
                EndRef::State(name)
            } else if let Some(attribute) = r.text("referenced_by_attribute") {
                EndRef::Attribute(attribute)
            } else {
                EndRef::Codes(Code::parse_list(r, "codes", errors))
            };
            StateKind::End(EndSpec {
                record: record_kind(state_type),
                reference,
            })
        }
        StateType::Procedure => StateKind::Procedure {
            codes: Code::parse_list(r, "codes", errors),
            reason: r.text("reason"),
            duration: match r.raw("duration") {
                Some(v) => Some(Timespan::parse_range(v, r.child("duration"), errors)?),
                None => None,
            },
        },
        StateType::Observation => {
            let source = if let Some(attribute) = r.text("attribute") {
                ObservationSource::Attribute(attribute)
            } else if let Some(sign) = r.text("vital_sign") {
                ObservationSource::VitalSign(sign)
            } else {
                ObservationSource::Amount(Amount::parse(r, errors)?)
            };
            StateKind::Observation {
                codes: Code::parse_list(r, "codes", errors),
                unit: r.text("unit"),
                source,
            }
        }
        StateType::VitalSign => StateKind::VitalSign {
            amount: Amount::parse(r, errors)?,
            vital_sign: r.text("vital_sign")?,
            unit: r.text("unit")?,
        },
        StateType::Symptom => StateKind::Symptom {
            amount: Amount::parse(r, errors)?,
            symptom: r.text("symptom")?,
            cause: r.text("cause"),
        },
        StateType::Death => StateKind::Death {
            codes: Code::parse_list(r, "codes", errors),
            delay: if r.has("exact") || r.has("range") {
                Some(Timespan::parse(r, errors)?)
            } else {
                None
            },
        },
    };
    Some(kind)
}

fn record_kind(state_type: StateType) -> RecordKind {
    match state_type {
        StateType::AllergyOnset | StateType::AllergyEnd => RecordKind::Allergy,
        StateType::MedicationOrder | StateType::MedicationEnd => RecordKind::Medication,
        StateType::CarePlanStart | StateType::CarePlanEnd => RecordKind::CarePlan,
        _ => RecordKind::Condition,
    }
}
