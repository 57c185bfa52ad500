//! Error type for address-space reads.

use thiserror::Error;

/// Behavioural error kinds for [`crate::AddressSpace`] operations.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MemoryErrorKind {
    /// `read_int` was asked for a size outside `{1, 2, 4, 8}`.
    #[error("invalid read size, expected one of 1, 2, 4, 8")]
    InvalidReadSize,
    /// The backing stream (core file, live `/proc/pid/mem`) failed to read.
    #[error("I/O failure reading backing memory")]
    IoFailure,
    /// An address had no covering load segment where one was required.
    #[error("address not covered by any load segment")]
    AddressUnmapped,
}

/// An error produced while reading through an [`crate::AddressSpace`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct MemoryError {
    kind: MemoryErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MemoryError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: MemoryErrorKind) -> Self {
        MemoryError { kind, source: None }
    }

    /// Attaches an underlying cause (e.g. a `std::io::Error`).
    pub fn with_source<E>(kind: MemoryErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MemoryError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> MemoryErrorKind {
        self.kind
    }
}

impl From<MemoryErrorKind> for MemoryError {
    fn from(kind: MemoryErrorKind) -> Self {
        MemoryError::new(kind)
    }
}
