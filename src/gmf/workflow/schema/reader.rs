// SPDX-License-Identifier: MIT

//! Typed access to a checked document node
//!
//! A [`Reader`] is opened on one object node against its registered
//! metadata. Opening runs the metadata check and pushes every problem into
//! the caller's error list; the typed getters then return `None` for
//! anything absent or of the wrong kind, so parsing carries on and later
//! siblings still get reported.

use serde_json::{Map, Value};

use super::metadata::{is_present, TypeMeta};
use super::registry;
use crate::sim::ValidationError;

pub struct Reader<'a> {
    node: &'a Map<String, Value>,
    meta: &'static TypeMeta,
    context: String,
}

impl<'a> Reader<'a> {
    /// Open `value` as the fixed type registered under `key`.
    ///
    /// Returns `None` for non-object values; the parent's metadata check
    /// has already reported those.
    pub fn open(
        value: &'a Value,
        key: &str,
        context: impl Into<String>,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Self> {
        let context = context.into();
        let node = value.as_object()?;
        let Some(meta) = registry::lookup(key) else {
            errors.push(ValidationError::new(format!(
                "No metadata registered for '{}' (at '{}')",
                key, context
            )));
            return None;
        };
        errors.extend(meta.check(node, &context));
        Some(Self {
            node,
            meta,
            context,
        })
    }

    /// Open `value` as a polymorphic type: the discriminator under `key`
    /// selects the metadata registered as `<base>::<discriminator>`.
    pub fn open_polymorphic(
        value: &'a Value,
        base: &str,
        key: &str,
        context: impl Into<String>,
        errors: &mut Vec<ValidationError>,
    ) -> Option<(Self, &'a str)> {
        let context = context.into();
        let node = value.as_object()?;
        let Some(discriminator) = node.get(key).and_then(Value::as_str) else {
            errors.push(ValidationError::new(format!(
                "Required '{}' is missing on {} '{}'",
                key, base, context
            )));
            return None;
        };
        let Some(meta) = registry::resolve(base, discriminator) else {
            errors.push(ValidationError::new(format!(
                "Unknown {} type '{}' on '{}'",
                base, discriminator, context
            )));
            return None;
        };
        errors.extend(meta.check(node, &context));
        Some((
            Self {
                node,
                meta,
                context,
            },
            discriminator,
        ))
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn type_name(&self) -> &'static str {
        self.meta.name
    }

    pub fn node(&self) -> &'a Map<String, Value> {
        self.node
    }

    /// Context string for a child field
    pub fn child(&self, field: &str) -> String {
        format!("{}.{}", self.context, field)
    }

    pub fn has(&self, field: &str) -> bool {
        is_present(self.node, field)
    }

    pub fn raw(&self, field: &str) -> Option<&'a Value> {
        self.node.get(field).filter(|v| !v.is_null())
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.raw(field).and_then(Value::as_str).map(str::to_string)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.raw(field).and_then(Value::as_f64)
    }

    pub fn boolean(&self, field: &str) -> Option<bool> {
        self.raw(field).and_then(Value::as_bool)
    }

    /// Entries of a list field with their child contexts
    pub fn items(&self, field: &str) -> Vec<(String, &'a Value)> {
        match self.raw(field) {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (format!("{}.{}[{}]", self.context, field, i), item))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Push an error worded against this node
    pub fn error(&self, errors: &mut Vec<ValidationError>, detail: impl AsRef<str>) {
        errors.push(ValidationError::new(format!(
            "{} on {} '{}'",
            detail.as_ref(),
            self.meta.name,
            self.context
        )));
    }
}
