//! Error types for Medley.

use thiserror::Error;

/// Result type alias using Medley's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dispatcher operations.
///
/// The taxonomy deliberately separates "the configuration is invalid"
/// ([`Error::Unsupported`]) from "no candidate survived filtering"
/// ([`Error::NotFound`]). Callers rely on this distinction to drive
/// capability-probing loops (try index 0, 1, 2 ... until `NotFound`).
#[derive(Error, Debug)]
pub enum Error {
    /// A filter property path, value kind, or value is invalid for the
    /// matching engine.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// The filter tree is well-formed but matches no candidate at the
    /// requested index.
    #[error("no matching runtime implementation found")]
    NotFound,

    /// The bound implementation does not support the requested operation
    /// (e.g. cloning a session on a runtime without a clonable device
    /// context).
    #[error("operation not implemented by the bound runtime: {0}")]
    NotImplemented(&'static str),

    /// Operation on a closed or never-created session or loader handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    /// Disjoin was requested on a session with no parent and no children.
    #[error("session is not joined")]
    NotJoined,

    /// The runtime implementation reported a failure while creating or
    /// operating on a session.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Create an `Unsupported` configuration error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a `Runtime` error from an implementation-reported failure.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert!(
            Error::unsupported("bad path")
                .to_string()
                .contains("unsupported configuration")
        );
        assert!(Error::NotFound.to_string().contains("no matching"));
        assert!(
            Error::InvalidHandle("session is closed")
                .to_string()
                .contains("invalid handle")
        );
    }

    #[test]
    fn test_not_found_is_not_unsupported() {
        // The probing-loop contract depends on these being distinct.
        assert!(!matches!(Error::NotFound, Error::Unsupported(_)));
    }
}
