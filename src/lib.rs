// SPDX-License-Identifier: MIT

//! gmf-rs: a generic module framework for simulating individuals through
//! declarative clinical state machines.

pub mod gmf;
pub mod sim;
