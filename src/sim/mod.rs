// SPDX-License-Identifier: MIT

//! Simulation primitives shared by every module: the individual, its
//! clinical record, simulated time, random streams and errors.

pub mod error;
pub mod person;
pub mod random;
pub mod record;
pub mod time;

pub use error::{EvalError, GmfError, ValidationError, ValidationReport};
pub use person::{Person, SocioeconomicScores};
pub use random::RandomStream;
pub use record::{ClinicalRecord, HealthRecord, RecordAction, RecordEvent, RecordKind};
pub use time::{Time, TimeUnit};
