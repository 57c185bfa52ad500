//! Error type for reflective value navigation.

use thiserror::Error;

/// Behavioural error kinds for [`crate::Dso`] navigation and reads.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ValueErrorKind {
    /// A named field does not exist on this value's type.
    #[error("no such field on this value's type")]
    FieldNotFound,
    /// An array/pointer index fell outside `[0, upper_bound]`.
    #[error("index outside the array's bounds")]
    IndexOutOfRange,
    /// This value has no resolvable address to read from.
    #[error("value has no resolvable address")]
    MissingAddress,
    /// The underlying DIE this value refers to has vanished from its unit.
    #[error("value's DIE is not present in its compilation unit")]
    DanglingDie,
    /// Reading the value's bytes from the target's address space failed.
    #[error("failed to read value bytes from the address space")]
    MemoryFailure,
}

/// An error navigating or reading a [`crate::Dso`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ValueError {
    kind: ValueErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ValueError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: ValueErrorKind) -> Self {
        ValueError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: ValueErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ValueError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> ValueErrorKind {
        self.kind
    }
}

impl From<ValueErrorKind> for ValueError {
    fn from(kind: ValueErrorKind) -> Self {
        ValueError::new(kind)
    }
}

impl From<postmortem_memory::MemoryError> for ValueError {
    fn from(err: postmortem_memory::MemoryError) -> Self {
        ValueError::with_source(ValueErrorKind::MemoryFailure, err)
    }
}
