// SPDX-License-Identifier: MIT

//! Transition engine
//!
//! Four ways of choosing a state's successor, all behind
//! [`Transition::follow`]:
//! - `direct_transition`: one fixed target
//! - `distributed_transition`: weighted random pick
//! - `conditional_transition`: first option whose condition holds
//! - `complex_transition`: first matching option, whose target may itself be
//!   a weighted list

use serde_json::{json, Map, Value};

use super::condition::{self, Condition, Scope, CONDITION};
use super::schema::{FieldKind, FieldMeta, Reader, Requirement, TypeMeta};
use crate::sim::{EvalError, Person, RandomStream, Time, ValidationError};

/// Document keys naming a transition, in the order they are looked up
pub const FIELDS: [&str; 4] = [
    "direct_transition",
    "distributed_transition",
    "conditional_transition",
    "complex_transition",
];

/// Outgoing transition of a state
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Direct(String),
    Distributed(Vec<DistributedOption>),
    Conditional(Vec<ConditionalOption>),
    Complex(Vec<ComplexOption>),
}

/// Weight of a distributed option
#[derive(Debug, Clone, PartialEq)]
pub enum Weight {
    Fixed(f64),
    /// Read from a person attribute at draw time
    Attribute { attribute: String, default: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributedOption {
    pub transition: String,
    pub weight: Weight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOption {
    /// `None` is an else-branch
    pub condition: Option<Condition>,
    pub transition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComplexTarget {
    State(String),
    Distributed(Vec<DistributedOption>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplexOption {
    pub condition: Option<Condition>,
    pub target: ComplexTarget,
}

impl Weight {
    pub fn resolve(&self, person: &Person) -> f64 {
        match self {
            Weight::Fixed(w) => *w,
            Weight::Attribute { attribute, default } => person
                .get(attribute)
                .and_then(Value::as_f64)
                .unwrap_or(*default),
        }
    }

    fn to_document(&self) -> Value {
        match self {
            Weight::Fixed(w) => json!(w),
            Weight::Attribute { attribute, default } => {
                json!({"attribute": attribute, "default": default})
            }
        }
    }
}

/// Pick from a weighted list using one draw from `rng`
pub fn pick_distributed<'a>(
    options: &'a [DistributedOption],
    person: &Person,
    rng: &mut RandomStream,
) -> Option<&'a str> {
    pick_with_draw(options, person, rng.next_unit())
}

/// Return the first option whose cumulative weight exceeds `draw`; when the
/// weights run out first, the last option.
pub fn pick_with_draw<'a>(
    options: &'a [DistributedOption],
    person: &Person,
    draw: f64,
) -> Option<&'a str> {
    let mut high = 0.0;
    for option in options {
        high += option.weight.resolve(person);
        if draw < high {
            return Some(&option.transition);
        }
    }
    options.last().map(|o| o.transition.as_str())
}

impl Transition {
    /// Choose the next state, or `None` when no conditional option matches
    pub fn follow<'a>(
        &'a self,
        scope: &Scope<'_>,
        time: Time,
        person: &Person,
        rng: &mut RandomStream,
    ) -> Result<Option<&'a str>, EvalError> {
        match self {
            Transition::Direct(target) => Ok(Some(target)),
            Transition::Distributed(options) => Ok(pick_distributed(options, person, rng)),
            Transition::Conditional(options) => {
                for option in options {
                    if holds(option.condition.as_ref(), scope, time, person)? {
                        return Ok(Some(&option.transition));
                    }
                }
                Ok(None)
            }
            Transition::Complex(options) => {
                for option in options {
                    if holds(option.condition.as_ref(), scope, time, person)? {
                        return Ok(match &option.target {
                            ComplexTarget::State(target) => Some(target),
                            ComplexTarget::Distributed(list) => {
                                pick_distributed(list, person, rng)
                            }
                        });
                    }
                }
                Ok(None)
            }
        }
    }

    /// Every state this transition can lead to, in document order without repeats
    pub fn targets(&self) -> Vec<&str> {
        let all: Vec<&str> = match self {
            Transition::Direct(t) => vec![t.as_str()],
            Transition::Distributed(options) => {
                options.iter().map(|o| o.transition.as_str()).collect()
            }
            Transition::Conditional(options) => {
                options.iter().map(|o| o.transition.as_str()).collect()
            }
            Transition::Complex(options) => options
                .iter()
                .flat_map(|o| match &o.target {
                    ComplexTarget::State(t) => vec![t.as_str()],
                    ComplexTarget::Distributed(list) => {
                        list.iter().map(|d| d.transition.as_str()).collect()
                    }
                })
                .collect(),
        };

        let mut out: Vec<&str> = Vec::with_capacity(all.len());
        for target in all {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// Document key this transition is written under
    pub fn field_name(&self) -> &'static str {
        match self {
            Transition::Direct(_) => FIELDS[0],
            Transition::Distributed(_) => FIELDS[1],
            Transition::Conditional(_) => FIELDS[2],
            Transition::Complex(_) => FIELDS[3],
        }
    }

    /// Weighted lists whose fixed weights stray from 1.0 by more than 1%
    pub fn weight_warnings(&self, state: &str) -> Vec<String> {
        let lists: Vec<&[DistributedOption]> = match self {
            Transition::Distributed(options) => vec![options.as_slice()],
            Transition::Complex(options) => options
                .iter()
                .filter_map(|o| match &o.target {
                    ComplexTarget::Distributed(list) => Some(list.as_slice()),
                    ComplexTarget::State(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        lists
            .into_iter()
            .filter_map(|list| {
                let mut sum = 0.0;
                for option in list {
                    match option.weight {
                        Weight::Fixed(w) => sum += w,
                        Weight::Attribute { .. } => return None,
                    }
                }
                ((sum - 1.0).abs() > 0.01).then(|| {
                    format!(
                        "State '{}' has distributed weights summing to {:.4}, expected 1.0",
                        state, sum
                    )
                })
            })
            .collect()
    }

    /// Options listed after a condition-less option are never taken
    pub fn shadowed_warnings(&self, state: &str) -> Vec<String> {
        let unconditional: Vec<bool> = match self {
            Transition::Conditional(options) => {
                options.iter().map(|o| o.condition.is_none()).collect()
            }
            Transition::Complex(options) => options.iter().map(|o| o.condition.is_none()).collect(),
            _ => return Vec::new(),
        };
        match unconditional.iter().position(|&u| u) {
            Some(i) if i + 1 < unconditional.len() => vec![format!(
                "State '{}' has {} option(s) after the unconditional option {} that are never taken",
                state,
                unconditional.len() - i - 1,
                i + 1
            )],
            _ => Vec::new(),
        }
    }

    /// Structural document form: targets and weights, conditions dropped
    pub fn to_document(&self) -> Value {
        let distributed = |list: &[DistributedOption]| -> Value {
            list.iter()
                .map(|o| {
                    json!({"transition": o.transition, "distribution": o.weight.to_document()})
                })
                .collect()
        };
        match self {
            Transition::Direct(t) => json!(t),
            Transition::Distributed(options) => distributed(options),
            Transition::Conditional(options) => options
                .iter()
                .map(|o| json!({"transition": o.transition}))
                .collect(),
            Transition::Complex(options) => options
                .iter()
                .map(|o| match &o.target {
                    ComplexTarget::State(t) => json!({"transition": t}),
                    ComplexTarget::Distributed(list) => json!({"distributions": distributed(list)}),
                })
                .collect(),
        }
    }

    /// `(target, label)` pairs for graph rendering
    pub fn edges(&self) -> Vec<(String, String)> {
        let weighted = |list: &[DistributedOption], prefix: &str| -> Vec<(String, String)> {
            list.iter()
                .map(|o| {
                    let label = match &o.weight {
                        Weight::Fixed(w) => {
                            format!("{}{}%", prefix, (w * 10_000.0).round() / 100.0)
                        }
                        Weight::Attribute { attribute, default } => {
                            format!("{}p({}, default {})", prefix, attribute, default)
                        }
                    };
                    (o.transition.clone(), label)
                })
                .collect()
        };
        let guard = |cond: &Option<Condition>| match cond {
            Some(c) => format!("if {}", c),
            None => "else".to_string(),
        };

        match self {
            Transition::Direct(t) => vec![(t.clone(), String::new())],
            Transition::Distributed(options) => weighted(options, ""),
            Transition::Conditional(options) => options
                .iter()
                .enumerate()
                .map(|(i, o)| {
                    (o.transition.clone(), format!("{}. {}", i + 1, guard(&o.condition)))
                })
                .collect(),
            Transition::Complex(options) => options
                .iter()
                .enumerate()
                .flat_map(|(i, o)| {
                    let prefix = format!("{}. {}: ", i + 1, guard(&o.condition));
                    match &o.target {
                        ComplexTarget::State(t) => {
                            vec![(t.clone(), prefix.trim_end_matches(": ").to_string())]
                        }
                        ComplexTarget::Distributed(list) => weighted(list, &prefix),
                    }
                })
                .collect(),
        }
    }
}

fn holds(
    cond: Option<&Condition>,
    scope: &Scope<'_>,
    time: Time,
    person: &Person,
) -> Result<bool, EvalError> {
    match cond {
        Some(cond) => condition::evaluate(cond, scope, time, person),
        None => Ok(true),
    }
}

/// Parse the transition declared on a state node.
///
/// `None` either means the state declares no transition or that parsing
/// failed; failures are always pushed to `errors`.
pub fn parse(state: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<Transition> {
    let declared: Vec<&str> = FIELDS
        .iter()
        .copied()
        .filter(|f| state.node().contains_key(*f))
        .collect();
    if declared.len() > 1 {
        state.error(
            errors,
            format!("At most one transition is allowed, found ({})", declared.join(", ")),
        );
        return None;
    }
    let field = *declared.first()?;
    let value = state.node().get(field).cloned().unwrap_or(Value::Null);
    let context = state.context().to_string();

    match field {
        "direct_transition" => {
            let wrapped = json!({ "transition": value });
            let r = Reader::open(&wrapped, "DirectTransition", context, errors)?;
            Some(Transition::Direct(r.text("transition")?))
        }
        "distributed_transition" => {
            let wrapped = wrap(field, value);
            let r = Reader::open(&wrapped, "DistributedTransition", context, errors)?;
            Some(Transition::Distributed(distributed_list(&r, field, errors)?))
        }
        "conditional_transition" => {
            let wrapped = wrap(field, value);
            let r = Reader::open(&wrapped, "ConditionalTransition", context, errors)?;
            let options: Vec<Option<ConditionalOption>> = r
                .items(field)
                .into_iter()
                .map(|(ctx, item)| conditional_option(item, ctx, errors))
                .collect();
            let options: Option<Vec<_>> = options.into_iter().collect();
            options.filter(|o| !o.is_empty()).map(Transition::Conditional)
        }
        _ => {
            let wrapped = wrap(field, value);
            let r = Reader::open(&wrapped, "ComplexTransition", context, errors)?;
            let options: Vec<Option<ComplexOption>> = r
                .items(field)
                .into_iter()
                .map(|(ctx, item)| complex_option(item, ctx, errors))
                .collect();
            let options: Option<Vec<_>> = options.into_iter().collect();
            options.filter(|o| !o.is_empty()).map(Transition::Complex)
        }
    }
}

fn wrap(field: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(field.to_string(), value);
    Value::Object(map)
}

fn distributed_list(
    r: &Reader<'_>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<Vec<DistributedOption>> {
    let options: Vec<Option<DistributedOption>> = r
        .items(field)
        .into_iter()
        .map(|(ctx, item)| distributed_option(item, ctx, errors))
        .collect();
    let options: Option<Vec<_>> = options.into_iter().collect();
    options.filter(|o| !o.is_empty())
}

fn distributed_option(
    value: &Value,
    context: String,
    errors: &mut Vec<ValidationError>,
) -> Option<DistributedOption> {
    let r = Reader::open(value, "DistributedTransitionOption", context, errors)?;
    let weight = match r.raw("distribution") {
        Some(Value::Number(n)) => Weight::Fixed(n.as_f64()?),
        Some(obj @ Value::Object(_)) => {
            let w = Reader::open(obj, "DistributionAttribute", r.child("distribution"), errors)?;
            Weight::Attribute {
                attribute: w.text("attribute")?,
                default: w.number("default")?,
            }
        }
        Some(_) => {
            r.error(errors, "Field 'distribution' must be a number or an attribute reference");
            return None;
        }
        None => return None,
    };
    Some(DistributedOption {
        transition: r.text("transition")?,
        weight,
    })
}

fn optional_condition(
    r: &Reader<'_>,
    errors: &mut Vec<ValidationError>,
) -> Option<Option<Condition>> {
    match r.raw("condition") {
        Some(value) => condition::parse(value, r.child("condition"), errors).map(Some),
        None => Some(None),
    }
}

fn conditional_option(
    value: &Value,
    context: String,
    errors: &mut Vec<ValidationError>,
) -> Option<ConditionalOption> {
    let r = Reader::open(value, "ConditionalTransitionOption", context, errors)?;
    let condition = optional_condition(&r, errors);
    Some(ConditionalOption {
        transition: r.text("transition")?,
        condition: condition?,
    })
}

fn complex_option(
    value: &Value,
    context: String,
    errors: &mut Vec<ValidationError>,
) -> Option<ComplexOption> {
    let r = Reader::open(value, "ComplexTransitionOption", context, errors)?;
    let condition = optional_condition(&r, errors);
    let target = match r.text("transition") {
        Some(t) => ComplexTarget::State(t),
        None => ComplexTarget::Distributed(distributed_list(&r, "distributions", errors)?),
    };
    Some(ComplexOption {
        condition: condition?,
        target,
    })
}

pub(crate) fn metadata() -> Vec<(&'static str, TypeMeta)> {
    let option_list = |field: &'static str, option: &'static str| {
        FieldMeta::many(field, 1, FieldKind::Nested(option))
    };
    vec![
        (
            "DirectTransition",
            TypeMeta::new("DirectTransition")
                .field(FieldMeta::required("transition", FieldKind::Text)),
        ),
        (
            "DistributedTransition",
            TypeMeta::new("DistributedTransition").field(option_list(
                "distributed_transition",
                "DistributedTransitionOption",
            )),
        ),
        (
            "DistributedTransitionOption",
            TypeMeta::new("DistributedTransitionOption")
                .field(FieldMeta::optional("transition", FieldKind::Text))
                .field(FieldMeta::optional("distribution", FieldKind::Any))
                .requires(Requirement::all(&["transition", "distribution"])),
        ),
        (
            "DistributionAttribute",
            TypeMeta::new("DistributionAttribute")
                .field(FieldMeta::required("attribute", FieldKind::Text))
                .field(FieldMeta::required("default", FieldKind::Number)),
        ),
        (
            "ConditionalTransition",
            TypeMeta::new("ConditionalTransition").field(option_list(
                "conditional_transition",
                "ConditionalTransitionOption",
            )),
        ),
        (
            "ConditionalTransitionOption",
            TypeMeta::new("ConditionalTransitionOption")
                .field(FieldMeta::optional("condition", CONDITION))
                .field(FieldMeta::required("transition", FieldKind::Text)),
        ),
        (
            "ComplexTransition",
            TypeMeta::new("ComplexTransition")
                .field(option_list("complex_transition", "ComplexTransitionOption")),
        ),
        (
            "ComplexTransitionOption",
            TypeMeta::new("ComplexTransitionOption")
                .field(FieldMeta::optional("condition", CONDITION))
                .field(FieldMeta::optional("transition", FieldKind::Text))
                .field(FieldMeta::many(
                    "distributions",
                    0,
                    FieldKind::Nested("DistributedTransitionOption"),
                ))
                .requires(Requirement::any(&["transition", "distributions"])),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmf::config::SesConfig;
    use crate::gmf::workflow::context::History;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn option(target: &str, weight: f64) -> DistributedOption {
        DistributedOption {
            transition: target.into(),
            weight: Weight::Fixed(weight),
        }
    }

    fn parse_state(doc: Value) -> (Option<Transition>, Vec<String>) {
        let mut errors = Vec::new();
        let (r, _) = Reader::open_polymorphic(&doc, "State", "type", "S", &mut errors).unwrap();
        let t = parse(&r, &mut errors);
        (t, errors.into_iter().map(|e| e.message).collect())
    }

    fn now() -> Time {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_distributed_frequencies_converge() {
        let options = vec![option("A", 0.2), option("B", 0.3), option("C", 0.5)];
        let person = Person::new();
        let mut rng = RandomStream::from_seed(1234);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let n = 10_000;
        for _ in 0..n {
            let pick = pick_distributed(&options, &person, &mut rng).unwrap();
            *counts.entry(pick).or_default() += 1;
        }
        for (target, weight) in [("A", 0.2), ("B", 0.3), ("C", 0.5)] {
            let freq = counts[target] as f64 / n as f64;
            assert!((freq - weight).abs() < 0.02, "{} drawn {}", target, freq);
        }
    }

    #[test]
    fn test_uncovered_tail_falls_to_last() {
        let options = vec![option("A", 0.2), option("B", 0.3)];
        let person = Person::new();
        assert_eq!(pick_with_draw(&options, &person, 0.1), Some("A"));
        assert_eq!(pick_with_draw(&options, &person, 0.4), Some("B"));
        assert_eq!(pick_with_draw(&options, &person, 0.7), Some("B"));
        assert_eq!(pick_with_draw(&options, &person, 0.99), Some("B"));
    }

    #[test]
    fn test_attribute_weight() {
        let options = vec![
            DistributedOption {
                transition: "Yes".into(),
                weight: Weight::Attribute {
                    attribute: "risk".into(),
                    default: 0.0,
                },
            },
            option("No", 1.0),
        ];
        let mut person = Person::new();
        assert_eq!(pick_with_draw(&options, &person, 0.5), Some("No"));
        person.set("risk", json!(0.8));
        assert_eq!(pick_with_draw(&options, &person, 0.5), Some("Yes"));
    }

    #[test]
    fn test_conditional_first_match() {
        let transition = Transition::Conditional(vec![
            ConditionalOption {
                condition: Some(Condition::True),
                transition: "First".into(),
            },
            ConditionalOption {
                condition: Some(Condition::False),
                transition: "Second".into(),
            },
            ConditionalOption {
                condition: Some(Condition::True),
                transition: "Third".into(),
            },
        ]);
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        let mut rng = RandomStream::from_seed(0);
        let next = transition
            .follow(&scope, now(), &Person::new(), &mut rng)
            .unwrap();
        assert_eq!(next, Some("First"));
    }

    #[test]
    fn test_conditional_without_match() {
        let transition = Transition::Conditional(vec![ConditionalOption {
            condition: Some(Condition::False),
            transition: "Never".into(),
        }]);
        let history = History::new();
        let ses = SesConfig::default();
        let mut rng = RandomStream::from_seed(0);
        let next = transition
            .follow(&Scope::new(&history, "m", &ses), now(), &Person::new(), &mut rng)
            .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_complex_nested_matches_distributed() {
        let list = vec![option("A", 0.25), option("B", 0.25), option("C", 0.5)];
        let complex = Transition::Complex(vec![
            ComplexOption {
                condition: Some(Condition::False),
                target: ComplexTarget::State("Skipped".into()),
            },
            ComplexOption {
                condition: None,
                target: ComplexTarget::Distributed(list.clone()),
            },
        ]);
        let plain = Transition::Distributed(list);
        let history = History::new();
        let ses = SesConfig::default();
        let scope = Scope::new(&history, "m", &ses);
        let person = Person::new();

        for seed in 0..50 {
            let mut a = RandomStream::from_seed(seed);
            let mut b = RandomStream::from_seed(seed);
            assert_eq!(
                complex.follow(&scope, now(), &person, &mut a).unwrap(),
                plain.follow(&scope, now(), &person, &mut b).unwrap()
            );
        }
    }

    #[test]
    fn test_parse_direct() {
        let (t, errors) = parse_state(json!({"type": "Simple", "direct_transition": "Next"}));
        assert!(errors.is_empty());
        assert_eq!(t, Some(Transition::Direct("Next".into())));
    }

    #[test]
    fn test_parse_direct_null_is_missing() {
        let (t, errors) = parse_state(json!({"type": "Simple", "direct_transition": null}));
        assert!(t.is_none());
        assert_eq!(errors, vec!["Required 'transition' is missing on DirectTransition 'S'"]);
    }

    #[test]
    fn test_parse_distributed_option_errors() {
        let (t, errors) = parse_state(json!({
            "type": "Simple",
            "distributed_transition": [{"transition": "A"}, {"distribution": 0.5}]
        }));
        assert!(t.is_none());
        assert_eq!(errors.len(), 2);
        for e in &errors {
            assert!(e.starts_with("All of (transition and distribution) are required on"));
        }
    }

    #[test]
    fn test_parse_complex_missing_pieces() {
        let (t, errors) = parse_state(json!({
            "type": "Simple",
            "complex_transition": [{"condition": {"condition_type": "True"}}]
        }));
        assert!(t.is_none());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("At least one of (transition or distributions) is required on"));
    }

    #[test]
    fn test_parse_two_transitions() {
        let (t, errors) = parse_state(json!({
            "type": "Simple",
            "direct_transition": "A",
            "conditional_transition": [{"transition": "B"}]
        }));
        assert!(t.is_none());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("At most one transition"));
    }

    #[test]
    fn test_targets_and_warnings() {
        let t = Transition::Distributed(vec![option("A", 0.5), option("B", 0.3), option("A", 0.1)]);
        assert_eq!(t.targets(), vec!["A", "B"]);
        let warnings = t.weight_warnings("Pick");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("0.9000"));

        let ok = Transition::Distributed(vec![option("A", 0.5), option("B", 0.499)]);
        assert!(ok.weight_warnings("Pick").is_empty());
    }
}
