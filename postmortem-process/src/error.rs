//! Error type for process/core-dump handling.

use thiserror::Error;

/// Behavioural error kinds for [`crate::CoreDump`] and the live-attach backend.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProcessErrorKind {
    /// The core image is not a valid ELF, or its program headers could not
    /// be read.
    #[error("malformed core image")]
    MalformedCore,
    /// A `ptrace` call, or a `/proc` read, failed.
    #[error("failed to attach to or read a live process")]
    AttachFailure,
}

/// An error building a [`crate::CoreDump`] or attaching to a live thread.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ProcessError {
    kind: ProcessErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProcessError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: ProcessErrorKind) -> Self {
        ProcessError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: ProcessErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProcessError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> ProcessErrorKind {
        self.kind
    }
}

impl From<goblin::error::Error> for ProcessError {
    fn from(err: goblin::error::Error) -> Self {
        ProcessError::with_source(ProcessErrorKind::MalformedCore, err)
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        ProcessError::with_source(ProcessErrorKind::AttachFailure, err)
    }
}
