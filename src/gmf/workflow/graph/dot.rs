// SPDX-License-Identifier: MIT

//! Graphviz rendering of a module's transition graph

use std::fmt::Write;

use super::module::Module;
use crate::gmf::workflow::state::{EndRef, ObservationSource, State, StateKind, StateType};

/// Render the module as a DOT digraph
pub fn to_dot(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(&module.name));
    let _ = writeln!(out, "  rankdir=TB;");
    let _ = writeln!(out, "  node [shape=box, style=rounded, fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(out, "  edge [fontname=\"Helvetica\", fontsize=9];");

    for state in module.states() {
        let mut label = format!("{}\\n[{}]", escape(&state.name), state.state_type.discriminator());
        for line in details(state) {
            label.push_str("\\n");
            label.push_str(&escape(&line));
        }
        let style = match state.state_type {
            StateType::Initial | StateType::Terminal => ", style=\"rounded,filled\", fillcolor=\"#d9d9d9\"",
            _ => "",
        };
        let _ = writeln!(out, "  \"{}\" [label=\"{}\"{}];", escape(&state.name), label, style);
    }

    for state in module.states() {
        let Some(transition) = &state.transition else {
            continue;
        };
        for (target, label) in transition.edges() {
            if label.is_empty() {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", escape(&state.name), escape(&target));
            } else {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [label=\"{}\"];",
                    escape(&state.name),
                    escape(&target),
                    escape(&label)
                );
            }
        }
    }

    out.push_str("}\n");
    out
}

fn details(state: &State) -> Vec<String> {
    let codes = |codes: &[crate::gmf::workflow::types::Code]| -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    };
    match &state.kind {
        StateKind::Initial | StateKind::Terminal | StateKind::Simple => Vec::new(),
        StateKind::Guard { allow } => vec![format!("Allow if {}", allow)],
        StateKind::Delay { wait } => vec![format!("Wait {}", wait)],
        StateKind::SetAttribute { attribute, value } => match value {
            Some(v) => vec![format!("Set '{}' = {}", attribute, v)],
            None => vec![format!("Clear '{}'", attribute)],
        },
        StateKind::Counter {
            attribute,
            increment,
        } => vec![format!(
            "{} '{}'",
            if *increment { "Increment" } else { "Decrement" },
            attribute
        )],
        StateKind::CallSubmodule { submodule } => vec![format!("Call '{}'", submodule)],
        StateKind::Encounter(spec) if spec.wellness => vec!["Wait for wellness encounter".into()],
        StateKind::Encounter(spec) => {
            let mut lines = codes(&spec.codes);
            if let Some(class) = &spec.encounter_class {
                lines.push(format!("Class: {}", class));
            }
            lines
        }
        StateKind::EncounterEnd { .. } => vec!["End current encounter".into()],
        StateKind::Start(spec) => {
            let mut lines = codes(&spec.codes);
            if let Some(attr) = &spec.assign_to_attribute {
                lines.push(format!("Assigned to '{}'", attr));
            }
            lines
        }
        StateKind::End(spec) => vec![match &spec.reference {
            EndRef::State(name) => format!("End '{}'", name),
            EndRef::Attribute(attr) => format!("End code in '{}'", attr),
            EndRef::Codes(list) => format!("End {}", codes(list).join(", ")),
        }],
        StateKind::Procedure { codes: list, .. } => codes(list),
        StateKind::Observation {
            codes: list,
            source,
            unit,
        } => {
            let mut lines = codes(list);
            let unit = unit.as_deref().unwrap_or("");
            lines.push(match source {
                ObservationSource::Amount(a) => format!("Value {} {}", a, unit),
                ObservationSource::Attribute(attr) => format!("Value of '{}' {}", attr, unit),
                ObservationSource::VitalSign(sign) => format!("Vital sign '{}' {}", sign, unit),
            });
            lines
        }
        StateKind::VitalSign {
            vital_sign,
            unit,
            amount,
        } => vec![format!("Set '{}' = {} {}", vital_sign, amount, unit)],
        StateKind::Symptom {
            symptom, amount, ..
        } => vec![format!("Set symptom '{}' = {}", symptom, amount)],
        StateKind::Death { delay, .. } => match delay {
            Some(span) => vec![format!("Dies after {}", span)],
            None => Vec::new(),
        },
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
