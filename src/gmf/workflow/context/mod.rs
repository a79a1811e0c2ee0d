// SPDX-License-Identifier: MIT

//! Execution contexts and the history they record

mod executor;
mod history;

pub use executor::{Context, Status, SuspendReason};
pub use history::{History, HistoryEntry};
