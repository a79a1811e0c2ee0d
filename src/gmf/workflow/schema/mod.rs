// SPDX-License-Identifier: MIT

//! Schema layer: field metadata, the discriminator registry and the
//! checked reader used by every typed parser.

pub mod metadata;
pub mod reader;
pub mod registry;

pub use metadata::{FieldKind, FieldMeta, MaxOccurs, Requirement, TypeMeta};
pub use reader::Reader;
