// SPDX-License-Identifier: MIT

//! Workflow states
//!
//! - `types`: state variants and their parser
//! - `effects`: what processing a state does to the individual

mod effects;
mod types;

pub use effects::{process, StateRun, Step};
pub use types::{
    EncounterSpec, EndRef, EndSpec, ObservationSource, StartSpec, State, StateKind, StateType,
};
