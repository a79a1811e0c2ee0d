// SPDX-License-Identifier: MIT

//! Typed error handling for gmf-rs
//!
//! Load-time problems are collected as [`ValidationError`]s and reported
//! together. Run-time problems fail the current step of one individual.

use std::fmt;
use thiserror::Error;

/// Top-level error type for gmf-rs
#[derive(Debug, Error)]
pub enum GmfError {
    /// The document does not have a shape the loader can read at all
    #[error("Unsupported document shape: {0}")]
    Document(String),

    /// One or more structural problems found while loading a module
    #[error("{0}")]
    Invalid(ValidationReport),

    /// A condition could not be evaluated
    #[error("Condition error: {0}")]
    Eval(#[from] EvalError),

    /// A state's effect could not be applied to the individual
    #[error("State '{state}' failed: {message}")]
    Effect { state: String, message: String },

    /// A sub-workflow or module name that is not registered
    #[error("Module '{0}' is not registered")]
    UnknownModule(String),

    /// Too many states were traversed within one simulated instant
    #[error("Module '{module}' visited more than {limit} states in one step (last state '{state}')")]
    StepLimit {
        module: String,
        state: String,
        limit: usize,
    },

    /// Configuration errors (missing file, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Condition evaluation errors.
///
/// These mean a referenced fact is unknown, which is different from a
/// condition that evaluated to false.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("No observation has ever been recorded for code '{0}'")]
    MissingObservation(String),

    #[error("Vital sign '{0}' has never been recorded")]
    MissingVitalSign(String),

    #[error("Individual has no birth date")]
    UnknownBirthDate,

    #[error("Individual has no socioeconomic scores")]
    MissingSocioeconomicStatus,
}

/// A single structural problem in a workflow document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// All structural problems found in one document, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport(pub Vec<ValidationError>);

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|e| e.message.clone()).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "Validation error: {}", single),
            errors => {
                write!(f, "Multiple validation errors ({} issues):", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    write!(f, "\n  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl From<Vec<ValidationError>> for ValidationReport {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }
}

impl GmfError {
    /// Create an effect error for a state
    pub fn effect(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Effect {
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a document shape error
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document(message.into())
    }
}

impl From<ValidationReport> for GmfError {
    fn from(report: ValidationReport) -> Self {
        Self::Invalid(report)
    }
}
