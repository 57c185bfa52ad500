//! Error type for opening a [`crate::DebuggerSession`].

use thiserror::Error;

/// Behavioural error kinds for session setup.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SessionErrorKind {
    /// Reading or memory-mapping a symbol or core file failed.
    #[error("failed to read a symbol or core file")]
    IoFailure,
    /// The symbol or core file is not a well-formed ELF image.
    #[error("not a well-formed ELF image")]
    MalformedObject,
    /// The symbol file carried no usable DWARF debugging information.
    #[error("no usable DWARF debugging information")]
    MissingDebugInfo,
}

/// An error constructing a [`crate::DebuggerSession`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SessionError {
    kind: SessionErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SessionError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: SessionErrorKind) -> Self {
        SessionError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: SessionErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SessionError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> SessionErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::with_source(SessionErrorKind::IoFailure, err)
    }
}

impl From<goblin::error::Error> for SessionError {
    fn from(err: goblin::error::Error) -> Self {
        SessionError::with_source(SessionErrorKind::MalformedObject, err)
    }
}

impl From<postmortem_dwarf::DwarfError> for SessionError {
    fn from(err: postmortem_dwarf::DwarfError) -> Self {
        SessionError::with_source(SessionErrorKind::MissingDebugInfo, err)
    }
}

impl From<postmortem_process::ProcessError> for SessionError {
    fn from(err: postmortem_process::ProcessError) -> Self {
        SessionError::with_source(SessionErrorKind::MalformedObject, err)
    }
}
