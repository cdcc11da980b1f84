//! The in-memory reference [`Storage`] implementation.
//!
//! Everything lives behind a single `parking_lot::RwLock`; this store exists
//! to exercise the executor and observer layers in tests and as a starting
//! point for a real backend, not as a production persistence layer.

use crate::error::FactError;
use crate::fact::{Envelope, Reference};
use crate::storage::Storage;
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Default)]
struct Inner {
    facts: FnvHashMap<Reference, Envelope>,
    /// successors[predecessor][role] = facts naming predecessor under role,
    /// in the order they were saved. A `Vec` with dedup-on-insert rather
    /// than a `HashSet`: §4.3 orders results by storage insertion order.
    successors: FnvHashMap<Reference, FnvHashMap<String, Vec<Reference>>>,
    bookmarks: FnvHashMap<String, String>,
}

/// An in-memory, single-process fact store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn save(&self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, FactError> {
        let mut inner = self.inner.write();
        let mut saved = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let reference = envelope.reference()?;
            if inner.facts.contains_key(&reference) {
                continue;
            }
            for (role, preds) in &envelope.fact.predecessors {
                for pred in preds {
                    if !inner.facts.contains_key(pred) {
                        return Err(FactError::NotFound(pred.clone()));
                    }
                    let bucket = inner
                        .successors
                        .entry(pred.clone())
                        .or_default()
                        .entry(role.clone())
                        .or_default();
                    if !bucket.contains(&reference) {
                        bucket.push(reference.clone());
                    }
                }
            }
            inner.facts.insert(reference.clone(), envelope.clone());
            saved.push(envelope);
        }
        Ok(saved)
    }

    async fn get(&self, reference: &Reference) -> Result<Option<Envelope>, FactError> {
        Ok(self.inner.read().facts.get(reference).cloned())
    }

    async fn which_exist(&self, refs: &[Reference]) -> Result<Vec<Reference>, FactError> {
        let inner = self.inner.read();
        Ok(refs
            .iter()
            .filter(|r| inner.facts.contains_key(r))
            .cloned()
            .collect())
    }

    async fn load(&self, refs: &[Reference]) -> Result<Vec<Envelope>, FactError> {
        let inner = self.inner.read();
        let mut closure = HashSet::new();
        let mut frontier: Vec<Reference> = refs.to_vec();
        while let Some(r) = frontier.pop() {
            if !closure.insert(r.clone()) {
                continue;
            }
            let envelope = inner
                .facts
                .get(&r)
                .ok_or_else(|| FactError::Corrupt(r.clone()))?;
            for preds in envelope.fact.predecessors.values() {
                frontier.extend(preds.iter().cloned());
            }
        }
        Ok(closure
            .into_iter()
            .map(|r| inner.facts.get(&r).cloned().expect("present by construction"))
            .collect())
    }

    async fn successors(
        &self,
        predecessor: &Reference,
        role: &str,
    ) -> Result<Vec<Reference>, FactError> {
        let inner = self.inner.read();
        Ok(inner
            .successors
            .get(predecessor)
            .and_then(|by_role| by_role.get(role))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_bookmark(&self, feed: &str, bookmark: String) -> Result<(), FactError> {
        self.inner
            .write()
            .bookmarks
            .insert(feed.to_owned(), bookmark);
        Ok(())
    }

    async fn load_bookmark(&self, feed: &str) -> Result<Option<String>, FactError> {
        Ok(self.inner.read().bookmarks.get(feed).cloned())
    }
}
