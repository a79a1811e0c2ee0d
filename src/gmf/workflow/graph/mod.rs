// SPDX-License-Identifier: MIT

//! Typed workflow graphs
//!
//! A [`Module`] is built once from a document, validated as a whole and then
//! shared read-only (behind `Arc`) by every individual's contexts.

pub mod dot;
pub mod module;
mod validator;

use serde_json::Value;

pub use dot::to_dot;
pub use module::{topology_of, Module, Topology};
pub use validator::validate_submodules;

/// Every structural problem in a module document, in a stable order.
/// Empty means the document is structurally sound.
pub fn validate(document: &Value) -> Vec<String> {
    match Module::assemble(document) {
        Ok((_, errors)) => errors.into_iter().map(|e| e.message).collect(),
        Err(err) => vec![err.to_string()],
    }
}
