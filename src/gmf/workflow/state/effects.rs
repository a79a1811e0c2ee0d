// SPDX-License-Identifier: MIT

//! What each state does to the individual when it is processed

use serde_json::{json, Value};

use super::types::{EndRef, ObservationSource, State, StateKind};
use crate::gmf::workflow::condition::{evaluate, resolve_codes, CodeRef, Scope};
use crate::gmf::workflow::context::SuspendReason;
use crate::gmf::workflow::graph::Module;
use crate::gmf::workflow::types::{Code, Timespan};
use crate::sim::{
    EvalError, GmfError, Person, RandomStream, RecordAction, RecordEvent, RecordKind, Time,
};

/// Outcome of processing a state
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The effect is done; follow the transition
    Leave,
    /// Stay in the state until the next step (or a collaborator's call)
    Wait(SuspendReason),
    /// Run the named module as a nested segment first
    Call(String),
}

/// Per-visit surroundings of the state being processed
pub struct StateRun<'a> {
    pub module: &'a Module,
    pub scope: Scope<'a>,
    /// When the individual entered the state
    pub entered: Time,
    /// Sampled end of a `Delay`, kept across steps
    pub delay_until: &'a mut Option<Time>,
    /// Set once a wellness encounter has been performed for this visit
    pub wellness_released: bool,
}

/// Apply the effect of `state` at `time`
pub fn process(
    state: &State,
    run: &mut StateRun<'_>,
    time: Time,
    person: &mut Person,
    rng: &mut RandomStream,
) -> Result<Step, GmfError> {
    match &state.kind {
        StateKind::Initial | StateKind::Terminal | StateKind::Simple => Ok(Step::Leave),

        StateKind::Guard { allow } => {
            if evaluate(allow, &run.scope, time, person)? {
                Ok(Step::Leave)
            } else {
                Ok(Step::Wait(SuspendReason::Guard))
            }
        }

        StateKind::Delay { wait } => {
            let until = match *run.delay_until {
                Some(until) => until,
                None => {
                    let until = wait
                        .end(run.entered, rng)
                        .ok_or_else(|| out_of_range(state, wait, run.entered))?;
                    *run.delay_until = Some(until);
                    until
                }
            };
            if time >= until {
                Ok(Step::Leave)
            } else {
                Ok(Step::Wait(SuspendReason::Delay { until }))
            }
        }

        StateKind::SetAttribute { attribute, value } => {
            person.set(attribute, value.clone().unwrap_or(Value::Null));
            Ok(Step::Leave)
        }

        StateKind::Counter {
            attribute,
            increment,
        } => {
            let current = person.get(attribute).and_then(Value::as_i64).unwrap_or(0);
            let next = if *increment { current + 1 } else { current - 1 };
            person.set(attribute, json!(next));
            Ok(Step::Leave)
        }

        StateKind::CallSubmodule { submodule } => Ok(Step::Call(submodule.clone())),

        StateKind::Encounter(spec) if spec.wellness => {
            if run.wellness_released {
                Ok(Step::Leave)
            } else {
                Ok(Step::Wait(SuspendReason::WellnessEncounter))
            }
        }

        StateKind::Encounter(spec) => {
            let code = first_code(state, &spec.codes)?;
            let mut event = RecordEvent::new(RecordKind::Encounter, RecordAction::Start, time, code)
                .with("display", display_of(&spec.codes))
                .with("state", state.name.as_str());
            if let Some(class) = &spec.encounter_class {
                event = event.with("class", class.as_str());
            }
            if let Some(reason) = &spec.reason {
                event = event.with("reason", reason_code(reason, run.module, person));
            }
            if let Some(open) = &person.current_encounter {
                log::debug!("State '{}' replaces open encounter '{}'", state.name, open);
            }
            person.record_mut().append(event);
            person.current_encounter = Some(code.to_string());
            Ok(Step::Leave)
        }

        StateKind::EncounterEnd {
            discharge_disposition,
        } => {
            match person.current_encounter.take() {
                Some(code) => {
                    let mut event =
                        RecordEvent::new(RecordKind::Encounter, RecordAction::Stop, time, code);
                    if let Some(disposition) = discharge_disposition {
                        event = event.with("discharge_disposition", disposition.code.as_str());
                    }
                    person.record_mut().append(event);
                }
                None => log::warn!(
                    "State '{}' of module '{}' ends an encounter but none is open",
                    state.name,
                    run.module.name
                ),
            }
            Ok(Step::Leave)
        }

        StateKind::Start(spec) => {
            let code = first_code(state, &spec.codes)?;
            let mut event = RecordEvent::new(spec.record, RecordAction::Start, time, code)
                .with("display", display_of(&spec.codes))
                .with("state", state.name.as_str());
            if spec.target_encounter.is_some() {
                if let Some(encounter) = &person.current_encounter {
                    event = event.with("encounter", encounter.as_str());
                }
            }
            if let Some(reason) = &spec.reason {
                event = event.with("reason", reason_code(reason, run.module, person));
            }
            if !spec.activities.is_empty() {
                let activities: Vec<Value> = spec
                    .activities
                    .iter()
                    .map(|c| json!(c.code))
                    .collect();
                event = event.with("activities", activities);
            }
            person.record_mut().append(event);

            if let Some(attribute) = &spec.assign_to_attribute {
                person.set(attribute, serde_json::to_value(&spec.codes[0])?);
            }
            Ok(Step::Leave)
        }

        StateKind::End(spec) => {
            let codes = match &spec.reference {
                EndRef::State(name) => match run.module.state(name).map(|s| &s.kind) {
                    Some(StateKind::Start(started)) => {
                        started.codes.iter().map(|c| c.code.clone()).collect::<Vec<_>>()
                    }
                    _ => {
                        return Err(GmfError::effect(
                            &state.name,
                            format!("'{}' is not a state that starts a {}", name, spec.record),
                        ))
                    }
                },
                EndRef::Attribute(attribute) => {
                    let codes = resolve_codes(&CodeRef::Attribute(attribute.clone()), person);
                    if codes.is_empty() {
                        return Err(GmfError::effect(
                            &state.name,
                            format!("attribute '{}' does not hold a code", attribute),
                        ));
                    }
                    codes
                }
                EndRef::Codes(list) => list.iter().map(|c| c.code.clone()).collect::<Vec<_>>(),
            };
            for code in codes {
                if person.record().is_active(spec.record, &code) {
                    person
                        .record_mut()
                        .append(RecordEvent::new(spec.record, RecordAction::Stop, time, code));
                } else {
                    log::debug!(
                        "State '{}' ends {} '{}' which is not active",
                        state.name,
                        spec.record,
                        code
                    );
                }
            }
            Ok(Step::Leave)
        }

        StateKind::Procedure {
            codes,
            reason,
            duration,
        } => {
            let code = first_code(state, codes)?;
            let mut event = RecordEvent::new(RecordKind::Procedure, RecordAction::Record, time, code)
                .with("display", display_of(codes));
            if let Some(reason) = reason {
                event = event.with("reason", reason_code(reason, run.module, person));
            }
            if let Some(span) = duration {
                let stop = span
                    .end(time, rng)
                    .ok_or_else(|| out_of_range(state, span, time))?;
                event = event.with("stop", stop.to_rfc3339());
            }
            person.record_mut().append(event);
            Ok(Step::Leave)
        }

        StateKind::Observation {
            codes,
            unit,
            source,
        } => {
            let code = first_code(state, codes)?;
            let value = match source {
                ObservationSource::Amount(amount) => json!(amount.sample(rng)),
                ObservationSource::Attribute(attribute) => {
                    person.get(attribute).cloned().ok_or_else(|| {
                        GmfError::effect(
                            &state.name,
                            format!("attribute '{}' is not set", attribute),
                        )
                    })?
                }
                ObservationSource::VitalSign(name) => {
                    let sign = person
                        .vital_sign(name)
                        .ok_or_else(|| EvalError::MissingVitalSign(name.clone()))?;
                    json!(sign.value)
                }
            };
            let mut event =
                RecordEvent::new(RecordKind::Observation, RecordAction::Record, time, code)
                    .with("display", display_of(codes))
                    .with("value", value);
            if let Some(unit) = unit {
                event = event.with("unit", unit.as_str());
            }
            person.record_mut().append(event);
            Ok(Step::Leave)
        }

        StateKind::VitalSign {
            vital_sign,
            unit,
            amount,
        } => {
            person.set_vital_sign(vital_sign, amount.sample(rng), unit);
            Ok(Step::Leave)
        }

        StateKind::Symptom {
            symptom,
            cause,
            amount,
        } => {
            let cause = cause.as_deref().unwrap_or(&run.module.name);
            person.set_symptom(cause, symptom, amount.sample(rng));
            Ok(Step::Leave)
        }

        StateKind::Death { codes, delay } => {
            let at = match delay {
                Some(span) => span
                    .end(time, rng)
                    .ok_or_else(|| out_of_range(state, span, time))?,
                None => time,
            };
            person.deceased = Some(at);
            let code = codes.first().map(|c| c.code.as_str()).unwrap_or("death");
            let mut event = RecordEvent::new(RecordKind::Death, RecordAction::Record, at, code)
                .with("module", run.module.name.as_str());
            if !codes.is_empty() {
                event = event.with("display", display_of(codes));
            }
            person.record_mut().append(event);
            log::info!("Person {} dies at {} in module '{}'", person.id, at, run.module.name);
            Ok(Step::Leave)
        }
    }
}

fn first_code<'c>(state: &State, codes: &'c [Code]) -> Result<&'c str, GmfError> {
    codes
        .first()
        .map(|c| c.code.as_str())
        .ok_or_else(|| GmfError::effect(&state.name, "no codes to record"))
}

fn out_of_range(state: &State, span: &Timespan, from: Time) -> GmfError {
    GmfError::effect(
        &state.name,
        format!("{} after {} is outside the supported time range", span, from),
    )
}

fn display_of(codes: &[Code]) -> String {
    codes
        .first()
        .map(|c| c.display.clone())
        .unwrap_or_default()
}

/// A `reason` names an attribute holding a code, or a state of the module
/// that starts one. Anything else is recorded as written.
fn reason_code(reason: &str, module: &Module, person: &Person) -> String {
    if let Some(code) = resolve_codes(&CodeRef::Attribute(reason.to_string()), person)
        .into_iter()
        .next()
    {
        return code;
    }
    if let Some(StateKind::Start(spec)) = module.state(reason).map(|s| &s.kind) {
        if let Some(code) = spec.codes.first() {
            return code.code.clone();
        }
    }
    reason.to_string()
}
