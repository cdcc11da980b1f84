/// Errors surfaced by the fork/queue layer.
#[derive(Debug, thiserror::Error)]
pub enum ForkError {
    /// The remote rejected the fact outright (HTTP 403 in a concrete binding).
    #[error("remote rejected fact of type {fact_type}")]
    Forbidden {
        /// The fact type the remote rejected.
        fact_type: String,
    },

    /// A network failure the caller, or the persistent outbox, may retry.
    #[error("remote send failed, retryable: {0}")]
    TransportRetryable(String),

    /// A non-retryable remote failure (a 4xx other than 401/407/419/403).
    #[error("remote send failed, fatal: {0}")]
    TransportFatal(String),

    /// The remote demanded reauthentication and the retry after
    /// `Authenticator::reauthenticate` also failed.
    #[error("reauthentication did not resolve the remote's challenge")]
    ReauthRequired,

    /// The local store rejected or could not complete the operation.
    #[error(transparent)]
    Storage(#[from] factgraph_core::FactError),

    /// The fork or subscriber was stopped mid-flight.
    #[error("operation cancelled")]
    Cancelled,
}
