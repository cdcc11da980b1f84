//! The offline-capable write path: local/remote split, a durable outbox for
//! the persistent fork mode, and a refcounted remote feed subscriber.
//!
//! Nothing here assumes a transport. `RemoteStore`/`RemoteFeed` are the
//! seam a concrete binding (HTTP, QUIC, an in-process test double) fills in.

pub mod error;
pub mod fork;
pub mod remote;
pub mod subscriber;

pub use error::ForkError;
pub use fork::{DrainReport, Fork, ForkMode, RetryBackoff};
pub use remote::{Authenticator, FeedBatch, NullRemote, OutboundOutcome, RemoteFeed, RemoteStore};
pub use subscriber::{NotifyFactsAdded, Subscriber};
