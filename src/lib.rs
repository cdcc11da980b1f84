//! A content-addressed, partially-ordered fact store with reactive queries
//! and per-type authorization.
//!
//! This crate is the facade: [`FactManager`] composes `factgraph-core`'s
//! fact model, query engine and observers, `factgraph-auth`'s rule engine,
//! and `factgraph-fork`'s local/remote write-path split into one running
//! engine. Each concern is usable on its own through its own crate; this
//! one just wires them together the way an application wants them wired.

pub mod config;
pub mod manager;

pub use config::EngineConfig;
pub use manager::FactManager;

pub use factgraph_auth::{AuthError, AuthorizationDefault, Engine, Rule};
pub use factgraph_core::{
    canonicalize, hash, reference, AddedCallback, Condition, Direction, Envelope,
    ExistentialCondition, Fact, FactError, FieldValue, Hash, Match, MemoryStore, ObservableSource,
    Observer, PathCondition, ProjectedValue, Projection, Quantifier, Query, Reference,
    RemovedCallback, Role, Specification, Step, Storage,
};
pub use factgraph_fork::{
    Authenticator, DrainReport, FeedBatch, Fork, ForkError, ForkMode, NotifyFactsAdded,
    NullRemote, OutboundOutcome, RemoteFeed, RemoteStore, RetryBackoff, Subscriber,
};
