//! Error type for expression evaluation.

use thiserror::Error;

/// Behavioural error kinds for [`crate::Evaluator`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ExpressionErrorKind {
    /// The opcode stream ended mid-operand, or an operand could not decode.
    #[error("malformed DWARF expression byte stream")]
    MalformedStream,
    /// The target's address space failed to satisfy a `DW_OP_deref`/`fbreg` read.
    #[error("memory read failed while evaluating expression")]
    MemoryFailure,
    /// No location-list entry in `.debug_loc` covers the requested instruction pointer.
    #[error("no location-list entry covers this instruction pointer")]
    NoCoveringLocation,
    /// The attribute this expression was meant to come from was absent.
    #[error("expression source attribute is absent")]
    MissingAttribute,
}

/// An error evaluating a DWARF location or frame-base expression.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ExpressionError {
    kind: ExpressionErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ExpressionError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: ExpressionErrorKind) -> Self {
        ExpressionError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: ExpressionErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ExpressionError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> ExpressionErrorKind {
        self.kind
    }
}

impl From<ExpressionErrorKind> for ExpressionError {
    fn from(kind: ExpressionErrorKind) -> Self {
        ExpressionError::new(kind)
    }
}

impl From<postmortem_memory::MemoryError> for ExpressionError {
    fn from(err: postmortem_memory::MemoryError) -> Self {
        ExpressionError::with_source(ExpressionErrorKind::MemoryFailure, err)
    }
}
