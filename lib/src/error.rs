//! Error kinds shared by the object store, pull engine, and static-delta
//! subsystems.

use thiserror::Error;

use crate::checksum::Checksum;
use crate::objects::ObjectType;

/// The single error type returned by every fallible `rootimage` operation.
///
/// Variants correspond one-to-one with the error kinds named in the design:
/// `NotFound`, `ChecksumMismatch`, `InvalidFormat`, `InvalidConfig`,
/// `RecursionExceeded`, `MissingSignatures`, `UntrustedSignature`,
/// `Transport`, `Cancelled`, `TransactionConflict`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{object_type} {checksum} not found")]
    NotFound {
        object_type: ObjectType,
        checksum: Checksum,
    },

    #[error("ref '{name}' not found")]
    RefNotFound { name: String },

    #[error("remote resource '{uri}' not found")]
    RemoteNotFound { uri: String },

    #[error(
        "checksum mismatch for {object_type} object: expected {expected}, computed {actual}"
    )]
    ChecksumMismatch {
        object_type: ObjectType,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("directory nesting exceeds the recursion bound ({limit})")]
    RecursionExceeded { limit: u32 },

    #[error("object has no attached signatures")]
    MissingSignatures,

    #[error("no configured keyring accepted any signature")]
    UntrustedSignature,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("transaction lock is held by another process")]
    TransactionConflict,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("While {phase}: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<camino::Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Returns whether this error is the "absent" flavor of not-found that
    /// callers are expected to treat as a normal branch rather than a
    /// failure (e.g. a detached-metadata object that simply doesn't exist).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::RefNotFound { .. } | Self::RemoteNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wraps an error with a phase prefix, so a caller several stack frames up
/// sees e.g. "While validating commit metadata '<csum>': checksum mismatch
/// ..." instead of the bare leaf error.
pub trait WithPhase<T> {
    fn with_phase(self, phase: impl FnOnce() -> String) -> Result<T>;
}

impl<T> WithPhase<T> for Result<T> {
    fn with_phase(self, phase: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::Phase {
            phase: phase(),
            source: Box::new(source),
        })
    }
}
