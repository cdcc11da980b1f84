//! Fact model, storage contract, query engine and reactive observers.
//!
//! This crate has no notion of authorization or network transport -- see
//! `factgraph-auth` and `factgraph-fork` for those. What it guarantees on
//! its own: a fact's reference is a pure function of its content, queries
//! and specifications evaluate deterministically against any `Storage`,
//! and an `Observer` delivers each match to its `added` callback exactly
//! once.

pub mod error;
pub mod executor;
pub mod fact;
pub mod observable;
pub mod observer;
pub mod query;
pub mod storage;
pub mod store_memory;

pub use error::FactError;
pub use fact::{canonicalize, hash, reference, Envelope, Fact, FieldValue, Hash, Reference};
pub use observable::ObservableSource;
pub use observer::{AddedCallback, Observer, RemovedCallback};
pub use query::{
    Condition, Direction, ExistentialCondition, Match, PathCondition, ProjectedValue, Projection,
    Quantifier, Query, Role, Specification, Step,
};
pub use storage::Storage;
pub use store_memory::MemoryStore;
