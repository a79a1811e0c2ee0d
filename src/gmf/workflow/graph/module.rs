// SPDX-License-Identifier: MIT

//! A loaded module: an immutable arena of states indexed by name

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::validator;
use crate::gmf::workflow::schema::{FieldKind, FieldMeta, Reader, TypeMeta};
use crate::gmf::workflow::state::{State, StateType};
use crate::sim::{GmfError, ValidationError, ValidationReport};

/// Targets of every state, keyed by state name
pub type Topology = BTreeMap<String, BTreeSet<String>>;

/// A typed workflow graph, shared read-only between individuals
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    states: Vec<State>,
    index: HashMap<String, usize>,
    initial: Option<usize>,
}

impl Module {
    /// Parse and validate a module document. Every structural problem is
    /// reported together in [`GmfError::Invalid`].
    pub fn from_document(document: &Value) -> Result<Module, GmfError> {
        let (module, errors) = Self::assemble(document)?;
        if !errors.is_empty() {
            return Err(ValidationReport(errors).into());
        }
        for warning in module.lint() {
            log::warn!("Module '{}': {}", module.name, warning);
        }
        log::debug!(
            "Loaded module '{}' with {} states",
            module.name,
            module.states.len()
        );
        Ok(module)
    }

    /// Build whatever parses and collect every error, without failing on them.
    /// Only unusable document shapes are returned as `Err`.
    pub(crate) fn assemble(document: &Value) -> Result<(Module, Vec<ValidationError>), GmfError> {
        let root = document
            .as_object()
            .ok_or_else(|| GmfError::document("module document must be an object"))?;
        let context = root
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("module")
            .to_string();

        let mut errors = Vec::new();
        let reader = Reader::open(document, "Module", context.clone(), &mut errors)
            .ok_or_else(|| GmfError::document("module metadata is not registered"))?;

        let empty = Map::new();
        let nodes = match reader.raw("states") {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(GmfError::document(format!(
                    "'states' of module '{}' must be a mapping",
                    context
                )))
            }
            None => &empty,
        };

        let mut states = Vec::with_capacity(nodes.len());
        for (name, node) in nodes {
            if !node.is_object() {
                return Err(GmfError::document(format!(
                    "state '{}' of module '{}' must be an object",
                    name, context
                )));
            }
            if let Some(state) = State::parse(name, node, &mut errors) {
                states.push(state);
            }
        }
        let parsed_cleanly = errors.is_empty();

        let mut module = Module {
            name: context,
            index: states
                .iter()
                .enumerate()
                .map(|(i, s)| (s.name.clone(), i))
                .collect(),
            states,
            initial: None,
        };

        let initials: Vec<&str> = module
            .states
            .iter()
            .filter(|s| s.state_type == StateType::Initial)
            .map(|s| s.name.as_str())
            .collect();
        match initials.as_slice() {
            [single] => module.initial = module.index.get(*single).copied(),
            [] if nodes.values().any(|n| n.get("type") == Some(&json!("Initial"))) => {}
            [] => errors.push(ValidationError::new(format!(
                "Module '{}' has no Initial state",
                module.name
            ))),
            many => errors.push(ValidationError::new(format!(
                "Module '{}' has {} Initial states ({}), expected exactly one",
                module.name,
                many.len(),
                many.join(", ")
            ))),
        }

        let declared: BTreeSet<&str> = nodes.keys().map(String::as_str).collect();
        errors.extend(validator::validate_graph(
            &module,
            &declared,
            parsed_cleanly,
        ));
        Ok((module, errors))
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    pub fn state_at(&self, index: usize) -> Option<&State> {
        self.states.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn initial_index(&self) -> Option<usize> {
        self.initial
    }

    pub fn initial_state(&self) -> Option<&State> {
        self.initial.and_then(|i| self.states.get(i))
    }

    /// States in name order
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Non-fatal findings: weight lists that do not sum to 1.0 and options
    /// shadowed by an earlier else-branch
    pub fn lint(&self) -> Vec<String> {
        self.states
            .iter()
            .filter_map(|s| s.transition.as_ref().map(|t| (s, t)))
            .flat_map(|(s, t)| {
                let mut warnings = t.weight_warnings(&s.name);
                warnings.extend(t.shadowed_warnings(&s.name));
                warnings
            })
            .collect()
    }

    /// Outgoing targets of every state
    pub fn topology(&self) -> Topology {
        self.states
            .iter()
            .map(|s| {
                let targets = s
                    .transition
                    .iter()
                    .flat_map(|t| t.targets())
                    .map(str::to_string)
                    .collect();
                (s.name.clone(), targets)
            })
            .collect()
    }

    /// Structural shape of the graph as a module document: state types and
    /// transitions (targets and weights; conditions are not written back)
    pub fn to_graph_document(&self) -> Value {
        let states: Map<String, Value> = self
            .states
            .iter()
            .map(|s| {
                let mut node = Map::new();
                node.insert("type".into(), json!(s.state_type.discriminator()));
                if let Some(t) = &s.transition {
                    node.insert(t.field_name().into(), t.to_document());
                }
                (s.name.clone(), Value::Object(node))
            })
            .collect();
        json!({ "name": self.name, "states": states })
    }
}

/// Read the transition topology straight from a module document
pub fn topology_of(document: &Value) -> Result<Topology, GmfError> {
    let states = document
        .get("states")
        .and_then(Value::as_object)
        .ok_or_else(|| GmfError::document("module document has no 'states' mapping"))?;

    let targets_in = |list: &Value| -> Vec<String> {
        list.as_array()
            .into_iter()
            .flatten()
            .filter_map(|o| o.get("transition").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    };

    let mut topology = Topology::new();
    for (name, node) in states {
        let mut targets = BTreeSet::new();
        if let Some(t) = node.get("direct_transition").and_then(Value::as_str) {
            targets.insert(t.to_string());
        }
        for field in ["distributed_transition", "conditional_transition"] {
            if let Some(list) = node.get(field) {
                targets.extend(targets_in(list));
            }
        }
        if let Some(options) = node.get("complex_transition").and_then(Value::as_array) {
            for option in options {
                if let Some(t) = option.get("transition").and_then(Value::as_str) {
                    targets.insert(t.to_string());
                }
                if let Some(list) = option.get("distributions") {
                    targets.extend(targets_in(list));
                }
            }
        }
        topology.insert(name.clone(), targets);
    }
    Ok(topology)
}

pub(crate) fn metadata() -> Vec<(&'static str, TypeMeta)> {
    vec![(
        "Module",
        TypeMeta::new("Module")
            .field(FieldMeta::required("name", FieldKind::Text))
            .field(FieldMeta::required("states", FieldKind::Any))
            .field(FieldMeta::optional("remarks", FieldKind::Any))
            .field(FieldMeta::optional("gmf_version", FieldKind::Number)),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "name": "sample",
            "states": {
                "Initial": {"type": "Initial", "direct_transition": "Pick"},
                "Pick": {
                    "type": "Simple",
                    "distributed_transition": [
                        {"transition": "Left", "distribution": 0.4},
                        {"transition": "Right", "distribution": 0.6}
                    ]
                },
                "Left": {
                    "type": "Simple",
                    "conditional_transition": [
                        {"condition": {"condition_type": "Gender", "gender": "F"}, "transition": "Right"},
                        {"transition": "Terminal"}
                    ]
                },
                "Right": {
                    "type": "Simple",
                    "complex_transition": [
                        {
                            "condition": {"condition_type": "True"},
                            "distributions": [
                                {"transition": "Terminal", "distribution": 0.5},
                                {"transition": "Left", "distribution": 0.5}
                            ]
                        }
                    ]
                },
                "Terminal": {"type": "Terminal"}
            }
        })
    }

    #[test]
    fn test_from_document() {
        let module = Module::from_document(&sample()).unwrap();
        assert_eq!(module.name, "sample");
        assert_eq!(module.len(), 5);
        assert_eq!(module.initial_state().unwrap().name, "Initial");
        assert!(module.state("Pick").is_some());
        assert!(module.lint().is_empty());
    }

    #[test]
    fn test_topology_round_trip() {
        let document = sample();
        let module = Module::from_document(&document).unwrap();
        let original = topology_of(&document).unwrap();

        assert_eq!(module.topology(), original);

        let rebuilt = Module::from_document(&module.to_graph_document()).unwrap();
        assert_eq!(rebuilt.topology(), original);
        assert_eq!(topology_of(&module.to_graph_document()).unwrap(), original);
    }

    #[test]
    fn test_missing_initial() {
        let doc = json!({"name": "m", "states": {"Only": {"type": "Terminal"}}});
        let err = Module::from_document(&doc).unwrap_err();
        assert!(err.to_string().contains("has no Initial state"));
    }

    #[test]
    fn test_two_initials() {
        let doc = json!({"name": "m", "states": {
            "A": {"type": "Initial", "direct_transition": "C"},
            "B": {"type": "Initial", "direct_transition": "C"},
            "C": {"type": "Terminal"}
        }});
        let err = Module::from_document(&doc).unwrap_err();
        assert!(err.to_string().contains("2 Initial states (A, B)"));
    }

    #[test]
    fn test_unusable_shapes() {
        assert!(matches!(
            Module::from_document(&json!([1, 2])),
            Err(GmfError::Document(_))
        ));
        assert!(matches!(
            Module::from_document(&json!({"name": "m", "states": [1]})),
            Err(GmfError::Document(_))
        ));
        assert!(matches!(
            Module::from_document(&json!({"name": "m", "states": {"A": 3}})),
            Err(GmfError::Document(_))
        ));
    }

    #[test]
    fn test_lint_weights() {
        let doc = json!({"name": "m", "states": {
            "Initial": {"type": "Initial", "distributed_transition": [
                {"transition": "End", "distribution": 0.5},
                {"transition": "End", "distribution": 0.3}
            ]},
            "End": {"type": "Terminal"}
        }});
        let module = Module::from_document(&doc).unwrap();
        let lint = module.lint();
        assert_eq!(lint.len(), 1);
        assert!(lint[0].contains("State 'Initial'"));
    }

    #[test]
    fn test_lint_shadowed_else_branch() {
        let doc = json!({"name": "m", "states": {
            "Initial": {"type": "Initial", "conditional_transition": [
                {"transition": "End"},
                {"condition": {"condition_type": "Gender", "gender": "F"}, "transition": "End"}
            ]},
            "End": {"type": "Terminal"}
        }});
        let module = Module::from_document(&doc).unwrap();
        assert_eq!(
            module.lint(),
            vec!["State 'Initial' has 1 option(s) after the unconditional option 1 that are never taken"]
        );

        // else-branch last is the normal shape
        assert!(Module::from_document(&sample()).unwrap().lint().is_empty());
    }
}
