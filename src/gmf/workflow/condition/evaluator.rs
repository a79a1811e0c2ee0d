// SPDX-License-Identifier: MIT

//! Condition evaluator
//!
//! Evaluation never mutates the individual or the history. A referenced fact
//! that was never recorded is an [`EvalError`], distinct from `false`.

use chrono::Datelike;
use serde_json::Value;

use super::ast::{CodeRef, Condition, Operator};
use crate::gmf::config::SesConfig;
use crate::gmf::workflow::context::{History, HistoryEntry};
use crate::sim::time::{elapsed, shift};
use crate::sim::{EvalError, Person, RecordKind, Time};

/// Read-only surroundings of an evaluation
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub history: &'a History,
    /// Module whose history `PriorState` inspects
    pub module: &'a str,
    pub ses: &'a SesConfig,
}

impl<'a> Scope<'a> {
    pub fn new(history: &'a History, module: &'a str, ses: &'a SesConfig) -> Self {
        Self {
            history,
            module,
            ses,
        }
    }
}

/// Evaluate a condition for `person` at `time`
pub fn evaluate(
    cond: &Condition,
    scope: &Scope<'_>,
    time: Time,
    person: &Person,
) -> Result<bool, EvalError> {
    match cond {
        Condition::True => Ok(true),
        Condition::False => Ok(false),
        Condition::And(parts) => {
            for part in parts {
                if !evaluate(part, scope, time, person)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(parts) => {
            for part in parts {
                if evaluate(part, scope, time, person)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(inner) => Ok(!evaluate(inner, scope, time, person)?),
        Condition::AtLeast {
            minimum,
            conditions,
        } => Ok(count_true(conditions, scope, time, person)? >= *minimum),
        Condition::AtMost {
            maximum,
            conditions,
        } => Ok(count_true(conditions, scope, time, person)? <= *maximum),
        Condition::Gender(gender) => Ok(person.gender() == Some(gender.as_str())),
        Condition::Race(race) => Ok(person.race() == Some(race.as_str())),
        Condition::Age {
            operator,
            quantity,
            unit,
        } => {
            let birth = person.birth.ok_or(EvalError::UnknownBirthDate)?;
            Ok(compare_numbers(*operator, elapsed(birth, time, *unit), *quantity))
        }
        Condition::Date { operator, year } => Ok(compare_numbers(
            *operator,
            time.year() as f64,
            *year as f64,
        )),
        Condition::SocioeconomicStatus(category) => {
            let scores = person
                .ses
                .as_ref()
                .ok_or(EvalError::MissingSocioeconomicStatus)?;
            Ok(scope.ses.in_category(*category, scope.ses.score(scores)))
        }
        Condition::Symptom {
            symptom,
            operator,
            value,
        } => Ok(compare_numbers(*operator, person.symptom(symptom), *value)),
        Condition::PriorState {
            name,
            within,
            since,
        } => {
            // a window reaching before the representable range covers all history
            let earliest = within.and_then(|span| shift(time, -span.amount.upper(), span.unit));
            let in_window = |entry: &HistoryEntry| earliest.map_or(true, |e| entry.exited >= e);
            let Some(since) = since else {
                return Ok(scope
                    .history
                    .last_exit(scope.module, name)
                    .is_some_and(in_window));
            };
            for entry in scope.history.for_module(scope.module).rev() {
                if entry.state == *since {
                    return Ok(false);
                }
                if entry.state == *name {
                    return Ok(in_window(entry));
                }
            }
            Ok(false)
        }
        Condition::Attribute {
            attribute,
            operator,
            value,
        } => Ok(compare(*operator, person.get_path(attribute), value.as_ref())),
        Condition::Observation {
            target,
            operator,
            value,
        } => {
            let codes = resolve_codes(target, person);
            let latest = codes
                .iter()
                .find_map(|code| person.record().latest_value(RecordKind::Observation, code));
            let recorded = || {
                codes
                    .iter()
                    .any(|code| person.record().has_recorded(RecordKind::Observation, code))
            };
            match latest {
                Some(observed) => Ok(compare(*operator, Some(observed), value.as_ref())),
                // recorded without a value compares as nil
                None if operator.is_nil_check() || recorded() => {
                    Ok(compare(*operator, None, value.as_ref()))
                }
                None => Err(EvalError::MissingObservation(describe_target(target, &codes))),
            }
        }
        Condition::VitalSign {
            vital_sign,
            operator,
            value,
        } => {
            let sign = person
                .vital_sign(vital_sign)
                .ok_or_else(|| EvalError::MissingVitalSign(vital_sign.clone()))?;
            Ok(compare_numbers(*operator, sign.value, *value))
        }
        Condition::Active { kind, target } => Ok(resolve_codes(target, person)
            .iter()
            .any(|code| person.record().is_active(*kind, code))),
    }
}

fn count_true(
    conditions: &[Condition],
    scope: &Scope<'_>,
    time: Time,
    person: &Person,
) -> Result<usize, EvalError> {
    let mut n = 0;
    for cond in conditions {
        if evaluate(cond, scope, time, person)? {
            n += 1;
        }
    }
    Ok(n)
}

/// Codes named directly or through an attribute holding a code string or
/// a `{code: ...}` object
pub fn resolve_codes(target: &CodeRef, person: &Person) -> Vec<String> {
    match target {
        CodeRef::Codes(codes) => codes.iter().map(|c| c.code.clone()).collect(),
        CodeRef::Attribute(attribute) => match person.get(attribute) {
            Some(Value::String(code)) => vec![code.clone()],
            Some(Value::Object(obj)) => obj
                .get("code")
                .and_then(Value::as_str)
                .map(|code| vec![code.to_string()])
                .unwrap_or_default(),
            _ => Vec::new(),
        },
    }
}

fn describe_target(target: &CodeRef, codes: &[String]) -> String {
    match (target, codes.is_empty()) {
        (CodeRef::Attribute(attribute), true) => format!("(attribute '{}' unset)", attribute),
        _ => codes.join(", "),
    }
}

/// Compare a document value against an observed one
pub fn compare(op: Operator, left: Option<&Value>, right: Option<&Value>) -> bool {
    let left = left.filter(|v| !v.is_null());
    match op {
        Operator::IsNil => left.is_none(),
        Operator::IsNotNil => left.is_some(),
        Operator::Eq => values_equal(left, right),
        Operator::Ne => !values_equal(left, right),
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            match (left.and_then(Value::as_f64), right.and_then(Value::as_f64)) {
                (Some(l), Some(r)) => compare_numbers(op, l, r),
                _ => false,
            }
        }
    }
}

fn values_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(l)), Some(Value::Number(r))) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => (l - r).abs() < f64::EPSILON,
            _ => false,
        },
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

pub fn compare_numbers(op: Operator, left: f64, right: f64) -> bool {
    match op {
        Operator::Lt => left < right,
        Operator::Lte => left <= right,
        Operator::Eq => (left - right).abs() < f64::EPSILON,
        Operator::Ne => (left - right).abs() >= f64::EPSILON,
        Operator::Gte => left >= right,
        Operator::Gt => left > right,
        Operator::IsNil => false,
        Operator::IsNotNil => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmf::workflow::types::{Amount, Code, Timespan};
    use crate::sim::{RecordAction, RecordEvent, SocioeconomicScores, TimeUnit};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn t(year: i32) -> Time {
        Utc.with_ymd_and_hms(year, 6, 1, 0, 0, 0).unwrap()
    }

    fn check(cond: &Condition, person: &Person, time: Time) -> bool {
        let history = History::new();
        let ses = SesConfig::default();
        evaluate(cond, &Scope::new(&history, "test", &ses), time, person).unwrap()
    }

    fn code(c: &str) -> Code {
        Code {
            system: "LOINC".into(),
            code: c.into(),
            display: c.into(),
        }
    }

    #[test]
    fn test_combinators() {
        let person = Person::new();
        let now = t(2000);
        let set = vec![Condition::True, Condition::False, Condition::True];

        assert!(!check(&Condition::And(set.clone()), &person, now));
        assert!(check(&Condition::Or(set.clone()), &person, now));
        assert!(check(&Condition::Not(Box::new(Condition::False)), &person, now));
        assert!(check(
            &Condition::AtLeast {
                minimum: 2,
                conditions: set.clone()
            },
            &person,
            now
        ));
        assert!(!check(
            &Condition::AtLeast {
                minimum: 3,
                conditions: set.clone()
            },
            &person,
            now
        ));
        assert!(check(
            &Condition::AtMost {
                maximum: 2,
                conditions: set.clone()
            },
            &person,
            now
        ));
        assert!(!check(
            &Condition::AtMost {
                maximum: 1,
                conditions: set
            },
            &person,
            now
        ));
    }

    #[test]
    fn test_age_operator_matrix() {
        let mut person = Person::new();
        person.birth = Some(t(1960));
        let age = |op| Condition::Age {
            operator: op,
            quantity: 40.0,
            unit: TimeUnit::Years,
        };

        // (age, op, expected)
        let cases = [
            (35, Operator::Lt, true),
            (40, Operator::Lt, false),
            (45, Operator::Lt, false),
            (35, Operator::Lte, true),
            (40, Operator::Lte, true),
            (45, Operator::Lte, false),
            (35, Operator::Eq, false),
            (40, Operator::Eq, true),
            (45, Operator::Eq, false),
            (35, Operator::Gte, false),
            (40, Operator::Gte, true),
            (45, Operator::Gte, true),
            (35, Operator::Gt, false),
            (40, Operator::Gt, false),
            (45, Operator::Gt, true),
            (35, Operator::Ne, true),
            (40, Operator::Ne, false),
            (45, Operator::Ne, true),
        ];
        for (years, op, expected) in cases {
            assert_eq!(
                check(&age(op), &person, t(1960 + years)),
                expected,
                "age {} {} 40",
                years,
                op
            );
        }
    }

    #[test]
    fn test_age_without_birth_is_error() {
        let person = Person::new();
        let history = History::new();
        let ses = SesConfig::default();
        let cond = Condition::Age {
            operator: Operator::Gt,
            quantity: 1.0,
            unit: TimeUnit::Years,
        };
        let err = evaluate(&cond, &Scope::new(&history, "m", &ses), t(2000), &person);
        assert_eq!(err, Err(EvalError::UnknownBirthDate));
    }

    #[test]
    fn test_gender_race_date() {
        let mut person = Person::new();
        person.set("gender", json!("F"));
        person.set("race", json!("asian"));

        assert!(check(&Condition::Gender("F".into()), &person, t(2000)));
        assert!(!check(&Condition::Gender("M".into()), &person, t(2000)));
        assert!(check(&Condition::Race("asian".into()), &person, t(2000)));
        assert!(check(
            &Condition::Date {
                operator: Operator::Gt,
                year: 1999
            },
            &person,
            t(2000)
        ));
        assert!(!check(
            &Condition::Date {
                operator: Operator::Lt,
                year: 2000
            },
            &person,
            t(2000)
        ));
    }

    #[test]
    fn test_socioeconomic_status() {
        let mut person = Person::new();
        person.ses = Some(SocioeconomicScores {
            education: 0.9,
            income: 0.9,
            occupation: 0.9,
        });
        assert!(check(
            &Condition::SocioeconomicStatus(crate::gmf::config::SesCategory::High),
            &person,
            t(2000)
        ));
        assert!(!check(
            &Condition::SocioeconomicStatus(crate::gmf::config::SesCategory::Low),
            &person,
            t(2000)
        ));
    }

    #[test]
    fn test_attribute_operators() {
        let mut person = Person::new();
        person.set("Diabetes_Severity", json!(2));
        person.set("Smoker", json!("yes"));

        let attr = |name: &str, op, value: Option<Value>| Condition::Attribute {
            attribute: name.into(),
            operator: op,
            value,
        };
        let now = t(2000);
        assert!(check(&attr("Smoker", Operator::Eq, Some(json!("yes"))), &person, now));
        assert!(check(&attr("Smoker", Operator::Ne, Some(json!("no"))), &person, now));
        assert!(check(&attr("Diabetes_Severity", Operator::Gte, Some(json!(2))), &person, now));
        assert!(!check(&attr("Diabetes_Severity", Operator::Gt, Some(json!(2))), &person, now));
        assert!(check(&attr("Missing", Operator::IsNil, None), &person, now));
        assert!(!check(&attr("Smoker", Operator::IsNil, None), &person, now));
        assert!(check(&attr("Smoker", Operator::IsNotNil, None), &person, now));
        assert!(!check(&attr("Missing", Operator::Eq, Some(json!("yes"))), &person, now));
    }

    #[test]
    fn test_symptom() {
        let mut person = Person::new();
        person.set_symptom("Appendicitis", "Pain", 60.0);
        let cond = Condition::Symptom {
            symptom: "Pain".into(),
            operator: Operator::Gte,
            value: 50.0,
        };
        assert!(check(&cond, &person, t(2000)));
    }

    #[test]
    fn test_vital_sign_missing_is_error() {
        let mut person = Person::new();
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        let cond = Condition::VitalSign {
            vital_sign: "Systolic Blood Pressure".into(),
            operator: Operator::Gt,
            value: 140.0,
        };
        assert!(matches!(
            evaluate(&cond, &scope, t(2000), &person),
            Err(EvalError::MissingVitalSign(_))
        ));

        person.set_vital_sign("Systolic Blood Pressure", 150.0, "mmHg");
        assert_eq!(evaluate(&cond, &scope, t(2000), &person), Ok(true));
    }

    #[test]
    fn test_observation_lookup() {
        let mut person = Person::new();
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        let cond = |op, value| Condition::Observation {
            target: CodeRef::Codes(vec![code("4548-4")]),
            operator: op,
            value,
        };

        assert_eq!(
            evaluate(&cond(Operator::Gt, Some(json!(6.5))), &scope, t(2000), &person),
            Err(EvalError::MissingObservation("4548-4".into()))
        );
        assert_eq!(
            evaluate(&cond(Operator::IsNil, None), &scope, t(2000), &person),
            Ok(true)
        );

        person.record_mut().append(
            RecordEvent::new(RecordKind::Observation, RecordAction::Record, t(2000), "4548-4")
                .with("value", 7.1),
        );
        assert_eq!(
            evaluate(&cond(Operator::Gt, Some(json!(6.5))), &scope, t(2000), &person),
            Ok(true)
        );
        assert_eq!(
            evaluate(&cond(Operator::IsNotNil, None), &scope, t(2000), &person),
            Ok(true)
        );
    }

    #[test]
    fn test_active_by_code_and_attribute() {
        let mut person = Person::new();
        person.record_mut().append(RecordEvent::new(
            RecordKind::Condition,
            RecordAction::Start,
            t(2000),
            "44054006",
        ));

        let by_code = Condition::Active {
            kind: RecordKind::Condition,
            target: CodeRef::Codes(vec![code("44054006")]),
        };
        let by_attr = Condition::Active {
            kind: RecordKind::Condition,
            target: CodeRef::Attribute("Diabetes".into()),
        };
        assert!(check(&by_code, &person, t(2001)));
        assert!(!check(&by_attr, &person, t(2001)));

        person.set("Diabetes", json!({"code": "44054006"}));
        assert!(check(&by_attr, &person, t(2001)));
    }

    fn entry(state: &str, exited: Time) -> HistoryEntry {
        HistoryEntry {
            module: "test".into(),
            segment: 0,
            state: state.into(),
            entered: exited,
            exited,
        }
    }

    fn prior(within_years: Option<f64>, since: Option<&str>) -> Condition {
        Condition::PriorState {
            name: "Diagnosis".into(),
            within: within_years.map(|q| Timespan {
                amount: Amount::Exact(q),
                unit: TimeUnit::Years,
            }),
            since: since.map(str::to_string),
        }
    }

    #[test]
    fn test_prior_state_within() {
        let person = Person::new();
        let ses = SesConfig::default();
        let mut history = History::new();
        history.push(entry("Diagnosis", t(2000)));
        let scope = Scope::new(&history, "test", &ses);
        let cond = prior(Some(3.0), None);

        assert_eq!(evaluate(&cond, &scope, t(2002), &person), Ok(true));
        assert_eq!(evaluate(&cond, &scope, t(2006), &person), Ok(false));
        // inclusive at exactly three years
        assert_eq!(evaluate(&cond, &scope, t(2003), &person), Ok(true));
        let just_after = t(2003) + chrono::Duration::seconds(1);
        assert_eq!(evaluate(&cond, &scope, just_after, &person), Ok(false));
    }

    #[test]
    fn test_prior_state_since() {
        let person = Person::new();
        let ses = SesConfig::default();
        let mut history = History::new();
        history.push(entry("Diagnosis", t(2000)));
        history.push(entry("Cured", t(2001)));
        let scope = Scope::new(&history, "test", &ses);

        assert_eq!(evaluate(&prior(None, None), &scope, t(2002), &person), Ok(true));
        assert_eq!(
            evaluate(&prior(None, Some("Cured")), &scope, t(2002), &person),
            Ok(false)
        );

        history.push(entry("Diagnosis", t(2002)));
        let scope = Scope::new(&history, "test", &ses);
        assert_eq!(
            evaluate(&prior(None, Some("Cured")), &scope, t(2003), &person),
            Ok(true)
        );
    }

    #[test]
    fn test_prior_state_ignores_other_modules() {
        let person = Person::new();
        let ses = SesConfig::default();
        let mut history = History::new();
        history.push(entry("Diagnosis", t(2000)));
        let scope = Scope::new(&history, "other", &ses);
        assert_eq!(evaluate(&prior(None, None), &scope, t(2001), &person), Ok(false));
    }

    #[test]
    fn test_prior_state_window_beyond_time_range() {
        let person = Person::new();
        let ses = SesConfig::default();
        let mut history = History::new();
        history.push(entry("Diagnosis", t(1900)));
        let scope = Scope::new(&history, "test", &ses);
        assert_eq!(
            evaluate(&prior(Some(1e9), None), &scope, t(2000), &person),
            Ok(true)
        );
    }

    #[test]
    fn test_observation_recorded_without_value() {
        let mut person = Person::new();
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        person.record_mut().append(RecordEvent::new(
            RecordKind::Observation,
            RecordAction::Record,
            t(2000),
            "2339-0",
        ));
        let cond = |op, value| Condition::Observation {
            target: CodeRef::Codes(vec![code("2339-0")]),
            operator: op,
            value,
        };

        assert_eq!(
            evaluate(&cond(Operator::Gt, Some(json!(100))), &scope, t(2000), &person),
            Ok(false)
        );
        assert_eq!(
            evaluate(&cond(Operator::IsNil, None), &scope, t(2000), &person),
            Ok(true)
        );
        // a different code was never recorded at all
        let other = Condition::Observation {
            target: CodeRef::Codes(vec![code("4548-4")]),
            operator: Operator::Gt,
            value: Some(json!(6.5)),
        };
        assert_eq!(
            evaluate(&other, &scope, t(2000), &person),
            Err(EvalError::MissingObservation("4548-4".into()))
        );
    }

    #[test]
    fn test_observation_by_unset_attribute_is_missing() {
        let person = Person::new();
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        let cond = Condition::Observation {
            target: CodeRef::Attribute("hba1c_code".into()),
            operator: Operator::Gt,
            value: Some(json!(6.5)),
        };
        assert_eq!(
            evaluate(&cond, &scope, t(2000), &person),
            Err(EvalError::MissingObservation("(attribute 'hba1c_code' unset)".into()))
        );
    }
}
