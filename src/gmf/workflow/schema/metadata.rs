// SPDX-License-Identifier: MIT

//! Field metadata declarations
//!
//! Each document type declares its fields once: occurrence bounds, the
//! expected value kind, and requirement groups that span several fields.

use serde_json::{Map, Value};
use std::fmt;

use crate::sim::ValidationError;

/// Upper occurrence bound of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    One,
    Unbounded,
}

/// Expected shape of a single field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any JSON value, not checked here
    Any,
    Text,
    Number,
    Bool,
    /// Object of a fixed registered type
    Nested(&'static str),
    /// Object whose type is named by a discriminator key
    Polymorphic {
        base: &'static str,
        key: &'static str,
    },
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Any => write!(f, "value"),
            FieldKind::Text => write!(f, "string"),
            FieldKind::Number => write!(f, "number"),
            FieldKind::Bool => write!(f, "boolean"),
            FieldKind::Nested(name) => write!(f, "{} object", name),
            FieldKind::Polymorphic { base, .. } => write!(f, "{} object", base),
        }
    }
}

/// Metadata for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: &'static str,
    pub min: usize,
    pub max: MaxOccurs,
    pub kind: FieldKind,
}

impl FieldMeta {
    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            min: 0,
            max: MaxOccurs::One,
            kind,
        }
    }

    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            min: 1,
            max: MaxOccurs::One,
            kind,
        }
    }

    /// A list of `kind` values with at least `min` entries
    pub fn many(name: &'static str, min: usize, kind: FieldKind) -> Self {
        Self {
            name,
            min,
            max: MaxOccurs::Unbounded,
            kind,
        }
    }
}

/// Requirement spanning one or more fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Field(&'static str),
    All(Vec<Requirement>),
    Any(Vec<Requirement>),
}

impl Requirement {
    pub fn all(fields: &[&'static str]) -> Self {
        Requirement::All(fields.iter().copied().map(Requirement::Field).collect())
    }

    pub fn any(fields: &[&'static str]) -> Self {
        Requirement::Any(fields.iter().copied().map(Requirement::Field).collect())
    }

    pub fn is_satisfied(&self, node: &Map<String, Value>) -> bool {
        match self {
            Requirement::Field(name) => is_present(node, name),
            Requirement::All(parts) => parts.iter().all(|p| p.is_satisfied(node)),
            Requirement::Any(parts) => parts.iter().any(|p| p.is_satisfied(node)),
        }
    }

    /// Error for an unsatisfied requirement on `type_name` at `context`
    pub fn error(&self, type_name: &str, context: &str) -> ValidationError {
        let message = match self {
            Requirement::Field(name) => {
                format!("Required '{}' is missing on {} '{}'", name, type_name, context)
            }
            Requirement::All(_) => {
                format!("All of {} are required on {} '{}'", self, type_name, context)
            }
            Requirement::Any(_) => format!(
                "At least one of {} is required on {} '{}'",
                self, type_name, context
            ),
        };
        ValidationError::new(message)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parts, joiner) = match self {
            Requirement::Field(name) => return f.write_str(name),
            Requirement::All(parts) => (parts, " and "),
            Requirement::Any(parts) => (parts, " or "),
        };
        let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
        write!(f, "({})", inner.join(joiner))
    }
}

/// Metadata for one document type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMeta {
    pub name: &'static str,
    pub fields: Vec<FieldMeta>,
    pub requires: Vec<Requirement>,
}

impl TypeMeta {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check occurrence bounds, value kinds and requirement groups of one
    /// node. Children are checked by their own parsers.
    pub fn check(&self, node: &Map<String, Value>, context: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for field in &self.fields {
            let value = match node.get(field.name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    if field.min >= 1 {
                        errors.push(Requirement::Field(field.name).error(self.name, context));
                    }
                    continue;
                }
            };

            match (field.max, value) {
                (MaxOccurs::One, Value::Array(items)) if field.kind != FieldKind::Any => {
                    errors.push(ValidationError::new(format!(
                        "Field '{}' on {} '{}' allows at most 1 value, found {}",
                        field.name,
                        self.name,
                        context,
                        items.len()
                    )));
                }
                (MaxOccurs::One, single) => {
                    if !kind_matches(field.kind, single) {
                        errors.push(kind_error(field, self.name, context));
                    }
                }
                (MaxOccurs::Unbounded, Value::Array(items)) => {
                    if items.len() < field.min {
                        errors.push(ValidationError::new(format!(
                            "Field '{}' on {} '{}' requires at least {} value(s), found {}",
                            field.name,
                            self.name,
                            context,
                            field.min,
                            items.len()
                        )));
                    }
                    if items.iter().any(|item| !kind_matches(field.kind, item)) {
                        errors.push(kind_error(field, self.name, context));
                    }
                }
                (MaxOccurs::Unbounded, _) => {
                    errors.push(ValidationError::new(format!(
                        "Field '{}' on {} '{}' must be a list",
                        field.name, self.name, context
                    )));
                }
            }
        }

        for requirement in &self.requires {
            if !requirement.is_satisfied(node) {
                errors.push(requirement.error(self.name, context));
            }
        }

        errors
    }
}

/// A key counts as present when it exists and is not null
pub fn is_present(node: &Map<String, Value>, name: &str) -> bool {
    node.get(name).is_some_and(|v| !v.is_null())
}

fn kind_matches(kind: FieldKind, value: &Value) -> bool {
    match kind {
        FieldKind::Any => true,
        FieldKind::Text => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Nested(_) | FieldKind::Polymorphic { .. } => value.is_object(),
    }
}

fn kind_error(field: &FieldMeta, type_name: &str, context: &str) -> ValidationError {
    ValidationError::new(format!(
        "Field '{}' on {} '{}' must be a {}",
        field.name, type_name, context, field.kind
    ))
}
