use crate::fact::Reference;

/// Errors surfaced at the boundary of the fact store.
///
/// Transport and authorization failures are deliberately not variants of this
/// enum: they belong to the crates that own those concerns
/// (`factgraph-auth::AuthError`, `factgraph-fork::ForkError`) and wrap a
/// `FactError` with `#[from]` where one naturally contains the other.
#[derive(Debug, thiserror::Error)]
pub enum FactError {
    /// Canonicalization or type constraints were violated.
    #[error("invalid fact: {reason}")]
    InvalidFact {
        /// Human readable description of the constraint that failed.
        reason: String,
    },

    /// A reference was required to be present in storage but was not found.
    #[error("fact not found: {0}")]
    NotFound(Reference),

    /// An ancestor closure referenced a fact that storage does not have.
    /// This is a corruption signal, not a transient condition.
    #[error("ancestor closure missing fact: {0}")]
    Corrupt(Reference),

    /// A specification failed validation at subscription/configuration time.
    #[error("malformed query: {reason}")]
    QueryMalformed {
        /// Human readable description of the validation failure.
        reason: String,
    },

    /// An observer or subscriber was stopped before an in-flight operation
    /// completed.
    #[error("operation cancelled")]
    Cancelled,
}
