// SPDX-License-Identifier: MIT

//! Condition tree and its discriminators

use serde_json::Value;
use std::fmt;

use crate::gmf::config::SesCategory;
use crate::gmf::workflow::schema::{FieldKind, FieldMeta, Requirement, TypeMeta};
use crate::gmf::workflow::types::{Code, Timespan};
use crate::sim::{RecordKind, TimeUnit};

/// A boolean condition over an individual at a point in time
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    AtLeast {
        minimum: usize,
        conditions: Vec<Condition>,
    },
    AtMost {
        maximum: usize,
        conditions: Vec<Condition>,
    },
    True,
    False,
    Gender(String),
    Race(String),
    Age {
        operator: Operator,
        quantity: f64,
        unit: TimeUnit,
    },
    Date {
        operator: Operator,
        year: i32,
    },
    SocioeconomicStatus(SesCategory),
    Symptom {
        symptom: String,
        operator: Operator,
        value: f64,
    },
    PriorState {
        name: String,
        within: Option<Timespan>,
        since: Option<String>,
    },
    Attribute {
        attribute: String,
        operator: Operator,
        value: Option<Value>,
    },
    Observation {
        target: CodeRef,
        operator: Operator,
        value: Option<Value>,
    },
    VitalSign {
        vital_sign: String,
        operator: Operator,
        value: f64,
    },
    Active {
        kind: RecordKind,
        target: CodeRef,
    },
}

/// How a clinical predicate names the code it looks for
#[derive(Debug, Clone, PartialEq)]
pub enum CodeRef {
    Codes(Vec<Code>),
    /// An attribute holding the code (or a code object)
    Attribute(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
    IsNil,
    IsNotNil,
}

impl Operator {
    pub fn parse(text: &str) -> Option<Operator> {
        match text {
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            "==" => Some(Operator::Eq),
            ">=" => Some(Operator::Gte),
            ">" => Some(Operator::Gt),
            "!=" => Some(Operator::Ne),
            "is nil" => Some(Operator::IsNil),
            "is not nil" => Some(Operator::IsNotNil),
            _ => None,
        }
    }

    /// `is nil` and `is not nil` take no right-hand value
    pub fn is_nil_check(self) -> bool {
        matches!(self, Operator::IsNil | Operator::IsNotNil)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Gte => ">=",
            Operator::Gt => ">",
            Operator::Ne => "!=",
            Operator::IsNil => "is nil",
            Operator::IsNotNil => "is not nil",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeRef::Codes(codes) => {
                let names: Vec<&str> = codes.iter().map(|c| c.display.as_str()).collect();
                write!(f, "{}", names.join(" or "))
            }
            CodeRef::Attribute(attr) => write!(f, "code in attribute '{}'", attr),
        }
    }
}

/// Short human-readable form, used for graph labels
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |parts: &[Condition], sep: &str| {
            parts
                .iter()
                .map(|c| format!("({})", c))
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Condition::And(parts) => write!(f, "{}", join(parts, " and ")),
            Condition::Or(parts) => write!(f, "{}", join(parts, " or ")),
            Condition::Not(inner) => write!(f, "not ({})", inner),
            Condition::AtLeast {
                minimum,
                conditions,
            } => write!(f, "at least {} of {}", minimum, join(conditions, ", ")),
            Condition::AtMost {
                maximum,
                conditions,
            } => write!(f, "at most {} of {}", maximum, join(conditions, ", ")),
            Condition::True => write!(f, "true"),
            Condition::False => write!(f, "false"),
            Condition::Gender(g) => write!(f, "gender is '{}'", g),
            Condition::Race(r) => write!(f, "race is '{}'", r),
            Condition::Age {
                operator,
                quantity,
                unit,
            } => write!(f, "age {} {} {}", operator, quantity, unit),
            Condition::Date { operator, year } => write!(f, "year {} {}", operator, year),
            Condition::SocioeconomicStatus(c) => write!(f, "{} socioeconomic status", c),
            Condition::Symptom {
                symptom,
                operator,
                value,
            } => write!(f, "symptom '{}' {} {}", symptom, operator, value),
            Condition::PriorState {
                name,
                within,
                since,
            } => {
                write!(f, "state '{}' has been processed", name)?;
                if let Some(span) = within {
                    write!(f, " within the past {}", span)?;
                }
                if let Some(since) = since {
                    write!(f, " since '{}'", since)?;
                }
                Ok(())
            }
            Condition::Attribute {
                attribute,
                operator,
                value,
            } => match value {
                Some(v) if !operator.is_nil_check() => {
                    write!(f, "attribute '{}' {} {}", attribute, operator, v)
                }
                _ => write!(f, "attribute '{}' {}", attribute, operator),
            },
            Condition::Observation {
                target,
                operator,
                value,
            } => match value {
                Some(v) if !operator.is_nil_check() => {
                    write!(f, "observation {} {} {}", target, operator, v)
                }
                _ => write!(f, "observation {} {}", target, operator),
            },
            Condition::VitalSign {
                vital_sign,
                operator,
                value,
            } => write!(f, "vital sign '{}' {} {}", vital_sign, operator, value),
            Condition::Active { kind, target } => write!(f, "active {}: {}", kind, target),
        }
    }
}

/// Document discriminators (`condition_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    And,
    Or,
    Not,
    AtLeast,
    AtMost,
    True,
    False,
    Gender,
    Race,
    Age,
    Date,
    SocioeconomicStatus,
    Symptom,
    PriorState,
    Attribute,
    Observation,
    VitalSign,
    ActiveCondition,
    ActiveCarePlan,
    ActiveMedication,
    ActiveAllergy,
}

impl ConditionType {
    pub const ALL: [ConditionType; 21] = [
        ConditionType::And,
        ConditionType::Or,
        ConditionType::Not,
        ConditionType::AtLeast,
        ConditionType::AtMost,
        ConditionType::True,
        ConditionType::False,
        ConditionType::Gender,
        ConditionType::Race,
        ConditionType::Age,
        ConditionType::Date,
        ConditionType::SocioeconomicStatus,
        ConditionType::Symptom,
        ConditionType::PriorState,
        ConditionType::Attribute,
        ConditionType::Observation,
        ConditionType::VitalSign,
        ConditionType::ActiveCondition,
        ConditionType::ActiveCarePlan,
        ConditionType::ActiveMedication,
        ConditionType::ActiveAllergy,
    ];

    pub fn discriminator(self) -> &'static str {
        match self {
            ConditionType::And => "And",
            ConditionType::Or => "Or",
            ConditionType::Not => "Not",
            ConditionType::AtLeast => "At Least",
            ConditionType::AtMost => "At Most",
            ConditionType::True => "True",
            ConditionType::False => "False",
            ConditionType::Gender => "Gender",
            ConditionType::Race => "Race",
            ConditionType::Age => "Age",
            ConditionType::Date => "Date",
            ConditionType::SocioeconomicStatus => "Socioeconomic Status",
            ConditionType::Symptom => "Symptom",
            ConditionType::PriorState => "PriorState",
            ConditionType::Attribute => "Attribute",
            ConditionType::Observation => "Observation",
            ConditionType::VitalSign => "Vital Sign",
            ConditionType::ActiveCondition => "Active Condition",
            ConditionType::ActiveCarePlan => "Active CarePlan",
            ConditionType::ActiveMedication => "Active Medication",
            ConditionType::ActiveAllergy => "Active Allergy",
        }
    }

    pub fn from_discriminator(text: &str) -> Option<ConditionType> {
        Self::ALL.into_iter().find(|t| t.discriminator() == text)
    }

    pub fn metadata(self) -> TypeMeta {
        let conditions = FieldMeta::many("conditions", 1, CONDITION);
        let operator = FieldMeta::required("operator", FieldKind::Text);
        let meta = TypeMeta::new(self.discriminator())
            .field(FieldMeta::required("condition_type", FieldKind::Text));

        match self {
            ConditionType::And | ConditionType::Or => meta.field(conditions),
            ConditionType::Not => meta.field(FieldMeta::required("condition", CONDITION)),
            ConditionType::AtLeast => meta
                .field(FieldMeta::required("minimum", FieldKind::Number))
                .field(conditions),
            ConditionType::AtMost => meta
                .field(FieldMeta::required("maximum", FieldKind::Number))
                .field(conditions),
            ConditionType::True | ConditionType::False => meta,
            ConditionType::Gender => meta.field(FieldMeta::required("gender", FieldKind::Text)),
            ConditionType::Race => meta.field(FieldMeta::required("race", FieldKind::Text)),
            ConditionType::Age => meta
                .field(FieldMeta::optional("operator", FieldKind::Text))
                .field(FieldMeta::optional("quantity", FieldKind::Number))
                .field(FieldMeta::optional("unit", FieldKind::Text))
                .requires(Requirement::all(&["operator", "quantity", "unit"])),
            ConditionType::Date => meta
                .field(FieldMeta::optional("year", FieldKind::Number))
                .field(FieldMeta::optional("operator", FieldKind::Text))
                .requires(Requirement::all(&["year", "operator"])),
            ConditionType::SocioeconomicStatus => {
                meta.field(FieldMeta::required("category", FieldKind::Text))
            }
            ConditionType::Symptom => meta
                .field(FieldMeta::optional("symptom", FieldKind::Text))
                .field(FieldMeta::optional("operator", FieldKind::Text))
                .field(FieldMeta::optional("value", FieldKind::Number))
                .requires(Requirement::all(&["symptom", "operator", "value"])),
            ConditionType::PriorState => meta
                .field(FieldMeta::required("name", FieldKind::Text))
                .field(FieldMeta::optional("within", FieldKind::Nested("TimedExact")))
                .field(FieldMeta::optional("since", FieldKind::Text)),
            ConditionType::Attribute => meta
                .field(FieldMeta::required("attribute", FieldKind::Text))
                .field(operator)
                .field(FieldMeta::optional("value", FieldKind::Any)),
            ConditionType::Observation => meta
                .field(operator)
                .field(FieldMeta::optional("value", FieldKind::Any))
                .field(FieldMeta::many("codes", 0, FieldKind::Nested("Code")))
                .field(FieldMeta::optional("referenced_by_attribute", FieldKind::Text))
                .requires(Requirement::any(&["codes", "referenced_by_attribute"])),
            ConditionType::VitalSign => meta
                .field(FieldMeta::optional("vital_sign", FieldKind::Text))
                .field(FieldMeta::optional("operator", FieldKind::Text))
                .field(FieldMeta::optional("value", FieldKind::Number))
                .requires(Requirement::all(&["vital_sign", "operator", "value"])),
            ConditionType::ActiveCondition
            | ConditionType::ActiveCarePlan
            | ConditionType::ActiveMedication
            | ConditionType::ActiveAllergy => meta
                .field(FieldMeta::many("codes", 0, FieldKind::Nested("Code")))
                .field(FieldMeta::optional("referenced_by_attribute", FieldKind::Text))
                .requires(Requirement::any(&["codes", "referenced_by_attribute"])),
        }
    }
}

/// Field kind of a nested condition
pub const CONDITION: FieldKind = FieldKind::Polymorphic {
    base: "Condition",
    key: "condition_type",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parse_and_display() {
        for text in ["<", "<=", "==", ">=", ">", "!=", "is nil", "is not nil"] {
            let op = Operator::parse(text).unwrap();
            assert_eq!(op.to_string(), text);
        }
        assert!(Operator::parse("=>").is_none());
        assert!(Operator::IsNil.is_nil_check());
        assert!(!Operator::Eq.is_nil_check());
    }

    #[test]
    fn test_discriminators_round_trip() {
        for t in ConditionType::ALL {
            assert_eq!(ConditionType::from_discriminator(t.discriminator()), Some(t));
        }
        assert_eq!(
            ConditionType::from_discriminator("Socioeconomic Status"),
            Some(ConditionType::SocioeconomicStatus)
        );
    }

    #[test]
    fn test_condition_display() {
        let cond = Condition::And(vec![
            Condition::Gender("F".into()),
            Condition::Not(Box::new(Condition::Age {
                operator: Operator::Lt,
                quantity: 18.0,
                unit: TimeUnit::Years,
            })),
        ]);
        assert_eq!(
            cond.to_string(),
            "(gender is 'F') and (not (age < 18 years))"
        );
    }
}
