// SPDX-License-Identifier: MIT

pub mod config;
pub mod simulation;
pub mod workflow;
