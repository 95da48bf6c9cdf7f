//! Common error types for Strongroom.

use thiserror::Error;

/// Top-level error type for Strongroom operations.
///
/// The set is closed: every core operation fails with exactly one of these
/// variants. Translating them into transport status codes is left to the
/// request layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input (missing field, out-of-range length, bad format).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate unique key, e.g. an email that is already registered.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad credentials or an invalid/expired token.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Authenticated, but not the owner of the resource.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// A persistence collaborator failed.
    #[error("Storage error: {0}")]
    Store(String),

    /// The first write of a two-row operation was committed, the second was not.
    ///
    /// Nothing is rolled back; `committed` names what is now persisted so the
    /// drift can be found and repaired.
    #[error("Partial write ({committed}): {source}")]
    PartialWrite {
        committed: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap `self` as the failed second half of a two-row operation.
    pub fn after_commit(self, committed: impl Into<String>) -> Self {
        Error::PartialWrite {
            committed: committed.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error reports persisted state left half-written.
    pub fn is_partial_write(&self) -> bool {
        matches!(self, Error::PartialWrite { .. })
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_commit_keeps_source() {
        let err = Error::Store("disk full".to_string()).after_commit("data item 42 created");

        assert!(err.is_partial_write());
        match err {
            Error::PartialWrite { committed, source } => {
                assert_eq!(committed, "data item 42 created");
                assert!(matches!(*source, Error::Store(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_errors_are_not_partial() {
        assert!(!Error::Crypto("bad tag".to_string()).is_partial_write());
    }
}
