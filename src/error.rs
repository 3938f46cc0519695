//! Error types for the generator pipeline.
//!
//! Every variant here is an internal consistency failure: the run aborts. Spec-shape
//! anomalies (unrecognized captions, unclassified algorithm macros) are not errors; they are
//! reported as [`Diagnostic`](crate::extract::Diagnostic)s and the table is skipped.

use crate::adapt::Lang;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("table '{caption}': row {row} does not match any {kind} row pattern: {cells:?}")]
    UnmatchedRow {
        caption: String,
        kind: &'static str,
        row: usize,
        cells: Vec<String>,
    },

    #[error("table '{caption}': {reason}")]
    MalformedTable { caption: String, reason: String },

    #[error("unknown type '{name}' referenced by {referrer}")]
    UnknownType { name: String, referrer: String },

    #[error("unresolved constant '{0}'")]
    UnresolvedConstant(String),

    #[error("expression '{expr}': {reason}")]
    Expression { expr: String, reason: String },

    #[error("duplicate type '{0}'")]
    DuplicateType(String),

    #[error("duplicate constant '{0}'")]
    DuplicateConstant(String),

    #[error("union {union}: {reason}")]
    UnionCollision { union: String, reason: String },

    #[error("structure {structure}: {reason}")]
    Inconsistent { structure: String, reason: String },

    #[error("registry invariants violated:\n{0}")]
    Invariant(String),

    #[error("registry is already adapted for {0}")]
    AlreadyAdapted(Lang),

    #[error("backend for {expected} needs a registry adapted for it (found {found})")]
    NotAdapted { expected: Lang, found: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenError {
    pub(crate) fn expression(expr: &str, reason: impl Into<String>) -> Self {
        GenError::Expression {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(structure: &str, reason: impl Into<String>) -> Self {
        GenError::Inconsistent {
            structure: structure.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = GenError> = std::result::Result<T, E>;
