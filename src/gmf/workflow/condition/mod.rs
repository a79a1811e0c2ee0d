// SPDX-License-Identifier: MIT

//! Logical conditions over an individual
//!
//! Conditions are recursive documents keyed by `condition_type`:
//! - combinators: `And`, `Or`, `Not`, `At Least`, `At Most`, `True`, `False`
//! - demographics: `Gender`, `Race`, `Age`, `Socioeconomic Status`
//! - time: `Date`, `PriorState`
//! - clinical: `Attribute`, `Symptom`, `Observation`, `Vital Sign`,
//!   `Active Condition` / `CarePlan` / `Medication` / `Allergy`

mod ast;
mod evaluator;
mod parser;

pub use ast::{CodeRef, Condition, ConditionType, Operator, CONDITION};
pub use evaluator::{compare, evaluate, resolve_codes, Scope};
pub use parser::parse;
