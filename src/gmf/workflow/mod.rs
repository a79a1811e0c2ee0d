// SPDX-License-Identifier: MIT

pub mod condition;
pub mod context;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod state;
pub mod transition;
pub mod types;
