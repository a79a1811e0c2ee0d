// SPDX-License-Identifier: MIT

//! Per-individual execution of one module
//!
//! A [`Context`] holds where an individual is in a module: a stack of frames
//! (one per active submodule call), the history of states left so far and a
//! status. Each call to [`Context::run`] processes states at one instant
//! until a state has to wait or the module terminates.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::history::{History, HistoryEntry};
use crate::gmf::config::SimulationConfig;
use crate::gmf::workflow::condition::Scope;
use crate::gmf::workflow::graph::Module;
use crate::gmf::workflow::registry::ModuleRegistry;
use crate::gmf::workflow::state::{self, StateRun, Step};
use crate::sim::{GmfError, Person, RandomStream, Time};

/// Where a context stands after a step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Status {
    /// Not started yet
    Idle,
    InState(String),
    Suspended {
        state: String,
        reason: SuspendReason,
    },
    /// The root module reached a terminal state. Further runs do nothing.
    Terminated,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::InState(state) => write!(f, "in '{}'", state),
            Status::Suspended { state, reason } => write!(f, "waiting in '{}' ({})", state, reason),
            Status::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why a context is waiting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    /// A `Delay` that ends at `until`
    Delay { until: Time },
    /// A `Guard` whose condition does not hold yet
    Guard,
    /// A wellness `Encounter` waiting for the next wellness visit
    WellnessEncounter,
    /// No conditional option matched; retried next step
    NoTransition,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::Delay { until } => write!(f, "delay until {}", until),
            SuspendReason::Guard => write!(f, "guard"),
            SuspendReason::WellnessEncounter => write!(f, "wellness encounter"),
            SuspendReason::NoTransition => write!(f, "no transition"),
        }
    }
}

struct Frame {
    module: Arc<Module>,
    state: usize,
    entered: Time,
    segment: usize,
    delay_until: Option<Time>,
    wellness_released: bool,
    /// The effect already ran; only the transition is left to follow
    leaving: bool,
}

impl Frame {
    fn enter(module: Arc<Module>, segment: usize, time: Time) -> Result<Frame, GmfError> {
        let state = module.initial_index().ok_or_else(|| {
            GmfError::document(format!("module '{}' has no Initial state", module.name))
        })?;
        Ok(Frame {
            module,
            state,
            entered: time,
            segment,
            delay_until: None,
            wellness_released: false,
            leaving: false,
        })
    }

    fn move_to(&mut self, state: usize, time: Time) {
        self.state = state;
        self.entered = time;
        self.delay_until = None;
        self.wellness_released = false;
        self.leaving = false;
    }
}

/// One individual's progress through one module
pub struct Context {
    root: Arc<Module>,
    registry: ModuleRegistry,
    config: Arc<SimulationConfig>,
    stack: Vec<Frame>,
    history: History,
    status: Status,
    segments: usize,
}

impl Context {
    pub fn new(root: Arc<Module>, registry: ModuleRegistry, config: Arc<SimulationConfig>) -> Self {
        Self {
            root,
            registry,
            config,
            stack: Vec::new(),
            history: History::new(),
            status: Status::Idle,
            segments: 0,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.root.name
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Name of the state the innermost frame is in
    pub fn current_state(&self) -> Option<&str> {
        let frame = self.stack.last()?;
        frame.module.state_at(frame.state).map(|s| s.name.as_str())
    }

    /// Number of active frames: 1 in the root module, +1 per nested call
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Process states at `time` until one waits or the module terminates
    pub fn run(
        &mut self,
        time: Time,
        person: &mut Person,
        rng: &mut RandomStream,
    ) -> Result<&Status, GmfError> {
        match self.status {
            Status::Terminated => return Ok(&self.status),
            Status::Idle => {
                log::debug!("Person {} starts module '{}'", person.id, self.root.name);
                self.stack.push(Frame::enter(Arc::clone(&self.root), 0, time)?);
            }
            _ => {}
        }
        self.advance(time, person, rng)?;
        Ok(&self.status)
    }

    /// Release a context waiting in a wellness `Encounter` and keep running.
    /// Returns whether the context was waiting for one.
    pub fn perform_wellness_encounter(
        &mut self,
        time: Time,
        person: &mut Person,
        rng: &mut RandomStream,
    ) -> Result<bool, GmfError> {
        let waiting = matches!(
            self.status,
            Status::Suspended {
                reason: SuspendReason::WellnessEncounter,
                ..
            }
        );
        if !waiting {
            return Ok(false);
        }
        if let Some(frame) = self.stack.last_mut() {
            frame.wellness_released = true;
        }
        self.advance(time, person, rng)?;
        Ok(true)
    }

    fn advance(
        &mut self,
        time: Time,
        person: &mut Person,
        rng: &mut RandomStream,
    ) -> Result<(), GmfError> {
        let limit = self.config.max_states_per_step;
        let mut visited = 0;

        while let Some(frame) = self.stack.last_mut() {
            let module = Arc::clone(&frame.module);
            let current = module
                .state_at(frame.state)
                .ok_or_else(|| GmfError::effect(module.name.as_str(), "state index out of range"))?;

            visited += 1;
            if visited > limit {
                return Err(GmfError::StepLimit {
                    module: module.name.clone(),
                    state: current.name.clone(),
                    limit,
                });
            }
            self.status = Status::InState(current.name.clone());

            if !frame.leaving {
                let mut run = StateRun {
                    module: &module,
                    scope: Scope::new(
                        &self.history,
                        &module.name,
                        &self.config.socioeconomic_status,
                    ),
                    entered: frame.entered,
                    delay_until: &mut frame.delay_until,
                    wellness_released: frame.wellness_released,
                };
                match state::process(current, &mut run, time, person, rng)? {
                    Step::Leave => frame.leaving = true,
                    Step::Wait(reason) => {
                        self.status = Status::Suspended {
                            state: current.name.clone(),
                            reason,
                        };
                        return Ok(());
                    }
                    Step::Call(name) => {
                        frame.leaving = true;
                        let submodule = self
                            .registry
                            .get(&name)
                            .ok_or_else(|| GmfError::UnknownModule(name.clone()))?;
                        self.segments += 1;
                        log::debug!(
                            "Module '{}' calls '{}' (segment {})",
                            module.name,
                            name,
                            self.segments
                        );
                        self.stack
                            .push(Frame::enter(submodule, self.segments, time)?);
                        continue;
                    }
                }
            }

            if !self.leave(time, person, rng)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Leave the innermost frame's state. Returns `false` when there is
    /// nothing more to process at this instant.
    fn leave(
        &mut self,
        time: Time,
        person: &mut Person,
        rng: &mut RandomStream,
    ) -> Result<bool, GmfError> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.status = Status::Terminated;
                return Ok(false);
            };
            let module = Arc::clone(&frame.module);
            let current = module
                .state_at(frame.state)
                .ok_or_else(|| GmfError::effect(module.name.as_str(), "state index out of range"))?;

            let transition = match &current.transition {
                Some(t) if !current.is_terminal() => t,
                _ => {
                    self.history.push(HistoryEntry {
                        module: module.name.clone(),
                        segment: frame.segment,
                        state: current.name.clone(),
                        entered: frame.entered,
                        exited: time,
                    });
                    self.stack.pop();
                    if self.stack.is_empty() {
                        log::debug!(
                            "Person {} finished module '{}' at {}",
                            person.id,
                            self.root.name,
                            time
                        );
                        self.status = Status::Terminated;
                        return Ok(false);
                    }
                    // the caller now leaves its CallSubmodule state
                    continue;
                }
            };

            let scope = Scope::new(&self.history, &module.name, &self.config.socioeconomic_status);
            match transition.follow(&scope, time, person, rng)? {
                None => {
                    self.status = Status::Suspended {
                        state: current.name.clone(),
                        reason: SuspendReason::NoTransition,
                    };
                    return Ok(false);
                }
                Some(target) => {
                    let next = module.index_of(target).ok_or_else(|| {
                        GmfError::effect(
                            current.name.as_str(),
                            format!("transition to unknown state '{}'", target),
                        )
                    })?;
                    self.history.push(HistoryEntry {
                        module: module.name.clone(),
                        segment: frame.segment,
                        state: current.name.clone(),
                        entered: frame.entered,
                        exited: time,
                    });
                    frame.move_to(next, time);
                    return Ok(true);
                }
            }
        }
    }
}
