//! Error type for stack unwinding.

use thiserror::Error;

/// Behavioural error kinds for [`crate::Unwinder`] and [`crate::Frame`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum UnwindErrorKind {
    /// A read required to resolve a frame's arguments or locals failed.
    #[error("failed to read frame-local memory")]
    MemoryFailure,
    /// Decoding a variable's location expression failed.
    #[error("failed to decode a variable's location")]
    ExpressionFailure,
}

/// An error populating the argument/local variables of a [`crate::Frame`].
///
/// Unwinding itself never returns this: CFI misses and frame-pointer-walk
/// regressions are normal end-of-stack conditions absorbed by
/// [`crate::Unwinder::unwind`], per `spec.md` §7's propagation policy.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct UnwindError {
    kind: UnwindErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl UnwindError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: UnwindErrorKind) -> Self {
        UnwindError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: UnwindErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        UnwindError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> UnwindErrorKind {
        self.kind
    }
}

impl From<postmortem_memory::MemoryError> for UnwindError {
    fn from(err: postmortem_memory::MemoryError) -> Self {
        UnwindError::with_source(UnwindErrorKind::MemoryFailure, err)
    }
}

impl From<postmortem_expr::ExpressionError> for UnwindError {
    fn from(err: postmortem_expr::ExpressionError) -> Self {
        UnwindError::with_source(UnwindErrorKind::ExpressionFailure, err)
    }
}
