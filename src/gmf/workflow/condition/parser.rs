// SPDX-License-Identifier: MIT

//! Condition parser: document node to [`Condition`]

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use super::ast::{CodeRef, Condition, ConditionType, Operator};
use crate::gmf::config::SesCategory;
use crate::gmf::workflow::schema::Reader;
use crate::gmf::workflow::types::{Code, Timespan};
use crate::sim::{RecordKind, TimeUnit, ValidationError};

/// Parse a condition node, pushing every structural problem into `errors`.
///
/// Returns `None` when the node (or any child) could not be built.
pub fn parse(
    value: &Value,
    context: impl Into<String>,
    errors: &mut Vec<ValidationError>,
) -> Option<Condition> {
    let (r, discriminator) =
        Reader::open_polymorphic(value, "Condition", "condition_type", context, errors)?;
    let kind = ConditionType::from_discriminator(discriminator)?;

    match kind {
        ConditionType::And => Some(Condition::And(children(&r, errors)?)),
        ConditionType::Or => Some(Condition::Or(children(&r, errors)?)),
        ConditionType::Not => {
            let inner = parse(r.raw("condition")?, r.child("condition"), errors)?;
            Some(Condition::Not(Box::new(inner)))
        }
        ConditionType::AtLeast => {
            let conditions = children(&r, errors);
            let minimum = count(&r, "minimum", errors)?;
            Some(Condition::AtLeast {
                minimum,
                conditions: conditions?,
            })
        }
        ConditionType::AtMost => {
            let conditions = children(&r, errors);
            let maximum = count(&r, "maximum", errors)?;
            Some(Condition::AtMost {
                maximum,
                conditions: conditions?,
            })
        }
        ConditionType::True => Some(Condition::True),
        ConditionType::False => Some(Condition::False),
        ConditionType::Gender => Some(Condition::Gender(r.text("gender")?)),
        ConditionType::Race => Some(Condition::Race(r.text("race")?)),
        ConditionType::Age => {
            let operator = operator(&r, errors)?;
            let unit = r.text("unit")?;
            let Ok(unit) = unit.parse::<TimeUnit>() else {
                r.error(errors, format!("Unknown time unit '{}'", unit));
                return None;
            };
            Some(Condition::Age {
                operator,
                quantity: r.number("quantity")?,
                unit,
            })
        }
        ConditionType::Date => {
            let operator = operator(&r, errors)?;
            let year = r.number("year")?;
            let (min, max) = (NaiveDate::MIN.year(), NaiveDate::MAX.year());
            if year.fract() != 0.0 || year < f64::from(min) || year > f64::from(max) {
                r.error(
                    errors,
                    format!("Year {} is not a whole year between {} and {}", year, min, max),
                );
                return None;
            }
            Some(Condition::Date {
                operator,
                year: year as i32,
            })
        }
        ConditionType::SocioeconomicStatus => {
            let text = r.text("category")?;
            match text.parse::<SesCategory>() {
                Ok(category) => Some(Condition::SocioeconomicStatus(category)),
                Err(_) => {
                    r.error(errors, format!("Unknown category '{}'", text));
                    None
                }
            }
        }
        ConditionType::Symptom => Some(Condition::Symptom {
            operator: operator(&r, errors)?,
            symptom: r.text("symptom")?,
            value: r.number("value")?,
        }),
        ConditionType::PriorState => {
            let within = match r.raw("within") {
                Some(v) => Some(Timespan::parse_exact(v, r.child("within"), errors)?),
                None => None,
            };
            Some(Condition::PriorState {
                name: r.text("name")?,
                within,
                since: r.text("since"),
            })
        }
        ConditionType::Attribute => {
            let operator = operator(&r, errors)?;
            let value = compared_value(&r, operator, errors)?;
            Some(Condition::Attribute {
                attribute: r.text("attribute")?,
                operator,
                value,
            })
        }
        ConditionType::Observation => {
            let operator = operator(&r, errors)?;
            let value = compared_value(&r, operator, errors)?;
            Some(Condition::Observation {
                target: code_ref(&r, errors)?,
                operator,
                value,
            })
        }
        ConditionType::VitalSign => Some(Condition::VitalSign {
            operator: operator(&r, errors)?,
            vital_sign: r.text("vital_sign")?,
            value: r.number("value")?,
        }),
        ConditionType::ActiveCondition => active(&r, RecordKind::Condition, errors),
        ConditionType::ActiveCarePlan => active(&r, RecordKind::CarePlan, errors),
        ConditionType::ActiveMedication => active(&r, RecordKind::Medication, errors),
        ConditionType::ActiveAllergy => active(&r, RecordKind::Allergy, errors),
    }
}

/// Parse every entry of `conditions`; all are visited so each reports its errors
fn children(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<Vec<Condition>> {
    let parsed: Vec<Option<Condition>> = r
        .items("conditions")
        .into_iter()
        .map(|(context, item)| parse(item, context, errors))
        .collect();
    if !r.has("conditions") {
        return None;
    }
    parsed.into_iter().collect()
}

fn count(r: &Reader<'_>, field: &str, errors: &mut Vec<ValidationError>) -> Option<usize> {
    let n = r.number(field)?;
    if n < 0.0 || n.fract() != 0.0 {
        r.error(errors, format!("Field '{}' must be a non-negative integer", field));
        return None;
    }
    Some(n as usize)
}

fn operator(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<Operator> {
    let text = r.text("operator")?;
    let op = Operator::parse(&text);
    if op.is_none() {
        r.error(errors, format!("Unknown operator '{}'", text));
    }
    op
}

/// Right-hand value; required unless the operator is a nil check
fn compared_value(
    r: &Reader<'_>,
    operator: Operator,
    errors: &mut Vec<ValidationError>,
) -> Option<Option<Value>> {
    match r.raw("value") {
        Some(v) => Some(Some(v.clone())),
        None if operator.is_nil_check() => Some(None),
        None => {
            r.error(errors, format!("Operator '{}' requires a 'value'", operator));
            None
        }
    }
}

fn code_ref(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<CodeRef> {
    if let Some(attribute) = r.text("referenced_by_attribute") {
        return Some(CodeRef::Attribute(attribute));
    }
    let before = errors.len();
    let codes = Code::parse_list(r, "codes", errors);
    if codes.is_empty() || errors.len() > before {
        return None;
    }
    Some(CodeRef::Codes(codes))
}

fn active(
    r: &Reader<'_>,
    kind: RecordKind,
    errors: &mut Vec<ValidationError>,
) -> Option<Condition> {
    Some(Condition::Active {
        kind,
        target: code_ref(r, errors)?,
    })
}
