//! The storage contract.
//!
//! `Storage` is the seam between the fact engine and wherever facts actually
//! live. This crate ships exactly one implementation, [`crate::store_memory::MemoryStore`],
//! which is enough to drive every test in this workspace; a concrete
//! embedded or remote backend is an external collaborator implementing the
//! same trait.

use crate::error::FactError;
use crate::executor;
use crate::fact::{Envelope, Reference};
use crate::query::{ProjectedValue, Query, Specification};
use async_trait::async_trait;

/// Operations a storage backend must provide. Default implementations of
/// `query` and `read` are supplied in terms of `get`/`successors`, so a
/// backend only has to implement the primitives; a backend able to push the
/// walk down to its own query layer (e.g. a remote SQL store) may override
/// them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Saves each envelope at most once. Returns only the envelopes that
    /// were newly written -- already-present envelopes are silently
    /// deduplicated. Callers must supply predecessors before or within the
    /// same batch; a missing predecessor is an error, not a partial save.
    async fn save(&self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, FactError>;

    /// Fetches a single fact by reference, if present.
    async fn get(&self, reference: &Reference) -> Result<Option<Envelope>, FactError>;

    /// Returns the subset of `refs` already present. Pure query, no side effects.
    async fn which_exist(&self, refs: &[Reference]) -> Result<Vec<Reference>, FactError>;

    /// Returns the union of the ancestor sets of `refs` (closure under predecessors).
    async fn load(&self, refs: &[Reference]) -> Result<Vec<Envelope>, FactError>;

    /// Returns every successor `s` of `predecessor` along `role`, i.e. every
    /// stored fact whose `predecessors[role]` contains `predecessor`.
    async fn successors(
        &self,
        predecessor: &Reference,
        role: &str,
    ) -> Result<Vec<Reference>, FactError>;

    /// Persists the stream position for `feed`.
    async fn save_bookmark(&self, feed: &str, bookmark: String) -> Result<(), FactError>;

    /// Loads the last persisted stream position for `feed`, if any.
    async fn load_bookmark(&self, feed: &str) -> Result<Option<String>, FactError>;

    /// Executes a step-based graph walk starting from `start`, returning the
    /// references reached at the end of the walk.
    async fn query(&self, start: &Reference, query: &Query) -> Result<Vec<Reference>, FactError> {
        executor::run_query(self, start, query).await
    }

    /// Executes a specification, returning one projected value per result tuple.
    async fn read(
        &self,
        given: &[(String, Reference)],
        spec: &Specification,
    ) -> Result<Vec<ProjectedValue>, FactError> {
        executor::run_specification(self, given, spec).await
    }
}
