//! The boundary between this crate and whatever transport actually moves
//! bytes. Nothing in this crate assumes HTTP, QUIC, or any particular wire
//! format -- a concrete binding implements these traits and classifies its
//! own status codes into an [`OutboundOutcome`].

use crate::error::ForkError;
use async_trait::async_trait;
use factgraph_core::{Envelope, Reference};

/// How a remote responded to an outbound save, already classified so the
/// fork layer never has to know what a 403 or a 419 means.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Accepted and durable on the remote.
    Accepted,
    /// The remote's own authorization rejected the fact.
    Forbidden,
    /// The remote demands fresh credentials before it will reconsider.
    ReauthRequired,
    /// A transient failure; safe to retry.
    Retryable,
    /// A non-retryable failure with a human-readable reason.
    Fatal(String),
}

/// One batch pulled from a remote feed: the references it contains and the
/// stream position to resume from next time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedBatch {
    /// References the feed reports as newly matching, past the prior bookmark.
    pub references: Vec<Reference>,
    /// Opaque position to persist and resume from.
    pub next_bookmark: String,
}

/// The outbound half of a remote collaborator: accepts pushed envelopes,
/// and loads envelopes by reference (used to hydrate references a feed
/// reports that are not yet known locally).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Pushes envelopes to the remote, returning its classified response.
    async fn save(&self, envelopes: Vec<Envelope>) -> Result<OutboundOutcome, ForkError>;

    /// Fetches envelopes for references the remote is assumed to hold.
    async fn load(&self, refs: &[Reference]) -> Result<Vec<Envelope>, ForkError>;
}

/// The inbound half: a named, bookmark-resumable stream of references.
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// Polls for references newly matching the feed past `bookmark`.
    async fn poll(&self, bookmark: Option<&str>) -> Result<FeedBatch, ForkError>;
}

/// Supplies the credentials a `RemoteStore`/`RemoteFeed` binding needs, and
/// the means to refresh them once after a `ReauthRequired` response.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// This process's own fact reference, used as the submitting author.
    fn user_identity(&self) -> Reference;

    /// Attempts to refresh credentials. Called at most once per failed
    /// remote operation.
    async fn reauthenticate(&self) -> Result<(), ForkError>;
}

/// The local-only remote: accepts nothing, offers nothing. Used when
/// `EngineConfig::remote` is absent.
pub struct NullRemote;

#[async_trait]
impl RemoteStore for NullRemote {
    async fn save(&self, _envelopes: Vec<Envelope>) -> Result<OutboundOutcome, ForkError> {
        Ok(OutboundOutcome::Accepted)
    }

    async fn load(&self, _refs: &[Reference]) -> Result<Vec<Envelope>, ForkError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RemoteFeed for NullRemote {
    async fn poll(&self, bookmark: Option<&str>) -> Result<FeedBatch, ForkError> {
        Ok(FeedBatch {
            references: Vec::new(),
            next_bookmark: bookmark.unwrap_or_default().to_owned(),
        })
    }
}
