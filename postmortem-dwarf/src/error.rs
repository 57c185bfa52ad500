//! Error type for type-graph construction.

use thiserror::Error;

/// Behavioural error kinds for parsing DWARF sections into a [`crate::TypeGraph`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DwarfErrorKind {
    /// The object file could not be parsed by `goblin`.
    #[error("malformed object file")]
    MalformedObject,
    /// A required DWARF section is missing or the data inside it is corrupt.
    #[error("corrupted dwarf debug data")]
    CorruptedData,
    /// A DIE referenced another DIE by offset that does not exist in the
    /// same compilation unit.
    #[error("reference to a nonexistent debug-info entry")]
    InvalidUnitRef,
}

/// An error parsing DWARF debugging information into the type graph.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DwarfError {
    /// Creates a new error of the given kind with no underlying cause.
    pub fn new(kind: DwarfErrorKind) -> Self {
        DwarfError { kind, source: None }
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(kind: DwarfErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DwarfError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The behavioural kind of this error.
    pub fn kind(&self) -> DwarfErrorKind {
        self.kind
    }
}

impl From<DwarfErrorKind> for DwarfError {
    fn from(kind: DwarfErrorKind) -> Self {
        DwarfError::new(kind)
    }
}

impl From<gimli::Error> for DwarfError {
    fn from(err: gimli::Error) -> Self {
        DwarfError::with_source(DwarfErrorKind::CorruptedData, GimliErrorWrapper(err))
    }
}

/// `gimli::Error` does not implement `std::error::Error`; wrap it so it can
/// be attached as a `source()`.
#[derive(Debug, Error)]
#[error(transparent)]
struct GimliErrorWrapper(gimli::Error);
