// SPDX-License-Identifier: MIT

//! Whole-graph checks run after every state has been parsed

use std::collections::{BTreeSet, HashSet, VecDeque};

use super::module::Module;
use crate::gmf::workflow::registry::ModuleRegistry;
use crate::gmf::workflow::state::StateKind;
use crate::sim::ValidationError;

/// Check transition targets, back-references and reachability.
///
/// `declared` holds every state name in the document, including states that
/// failed to parse, so those do not cause follow-up errors. Reachability is
/// only checked when every state parsed, since a broken state hides edges.
pub fn validate_graph(
    module: &Module,
    declared: &BTreeSet<&str>,
    check_reachability: bool,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for state in module.states() {
        if let Some(transition) = &state.transition {
            for target in transition.targets() {
                if !declared.contains(target) {
                    errors.push(ValidationError::new(format!(
                        "State '{}' transitions to unknown state '{}'",
                        state.name, target
                    )));
                }
            }
        }

        for (field, target, expected) in state.back_references() {
            match module.state(target) {
                Some(found) if found.state_type != expected => {
                    errors.push(ValidationError::new(format!(
                        "{} is expected to refer to a '{}' but value '{}' is actually a '{}'",
                        field,
                        expected.discriminator(),
                        target,
                        found.state_type.discriminator()
                    )));
                }
                Some(_) => {}
                None if declared.contains(target) => {}
                None => errors.push(ValidationError::new(format!(
                    "{} references state '{}' which does not exist",
                    field, target
                ))),
            }
        }
    }

    if check_reachability {
        if let Some(start) = module.initial_index() {
            let reached = reachable(module, start);
            for (i, state) in module.states().enumerate() {
                if !reached.contains(&i) {
                    errors.push(ValidationError::new(format!(
                        "State '{}' is unreachable",
                        state.name
                    )));
                }
            }
        }
    }

    errors
}

fn reachable(module: &Module, start: usize) -> HashSet<usize> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(i) = queue.pop_front() {
        let Some(transition) = module.state_at(i).and_then(|s| s.transition.as_ref()) else {
            continue;
        };
        for target in transition.targets() {
            if let Some(next) = module.index_of(target) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }
    seen
}

/// Every `CallSubmodule` must name a registered module
pub fn validate_submodules(module: &Module, registry: &ModuleRegistry) -> Vec<ValidationError> {
    module
        .states()
        .filter_map(|state| match &state.kind {
            StateKind::CallSubmodule { submodule } if !registry.contains(submodule) => {
                Some(ValidationError::new(format!(
                    "State '{}' of module '{}' calls unknown submodule '{}'",
                    state.name, module.name, submodule
                )))
            }
            _ => None,
        })
        .collect()
}
