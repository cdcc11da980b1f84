//! The pub/sub fabric [`Observer`]s register against.
//!
//! `ObservableSource` does not itself evaluate queries; it only fans a
//! stream of newly-saved envelopes out to every subscriber, letting each
//! subscriber decide whether and how to re-evaluate. Keeping the fan-out
//! dumb means adding a new subscription never has to teach this type
//! anything about specifications.

use crate::fact::Envelope;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Something that wants to hear about every envelope saved through a
/// particular source. `crate::observer::Observer` is the only
/// implementation in this crate.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Called with each batch of newly-saved envelopes, in save order.
    async fn notify(&self, envelopes: &[Envelope]);
}

/// A broadcast point: facts flow in through [`ObservableSource::notify`] and
/// out to every live subscriber registered through [`ObservableSource::subscribe`].
///
/// Subscribers are held weakly; a subscriber with no other owner is dropped
/// silently on the next notification rather than leaking forever.
#[derive(Default)]
pub struct ObservableSource {
    subscribers: RwLock<Vec<Weak<dyn Subscriber>>>,
}

impl ObservableSource {
    /// A source with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. The caller retains the strong `Arc`; this
    /// source keeps only a weak reference, so the subscription ends when the
    /// caller drops it (or calls `Observer::stop`, which releases its own
    /// strong self-reference).
    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.subscribers.write().push(Arc::downgrade(subscriber));
    }

    /// Fans `envelopes` out to every live subscriber, dropping any that have
    /// since gone away.
    pub async fn notify(&self, envelopes: &[Envelope]) {
        if envelopes.is_empty() {
            return;
        }
        let snapshot: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .filter_map(|w| w.upgrade())
            .collect();
        for subscriber in &snapshot {
            subscriber.notify(envelopes).await;
        }
        // Prune dead weak refs in place rather than replacing the whole
        // vector with `snapshot`'s downgrades: a `subscribe` racing with this
        // notify (e.g. another task registering mid-await on a
        // multi-threaded executor) would otherwise have its entry clobbered
        // by this stale snapshot once we finish.
        self.subscribers.write().retain(|w| w.strong_count() > 0);
    }

    /// The number of subscribers still alive. Exposed for tests; not part of
    /// the steady-state API.
    #[cfg(test)]
    fn live_count(&self) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Subscriber for Counter {
        async fn notify(&self, envelopes: &[Envelope]) {
            self.0.fetch_add(envelopes.len(), Ordering::SeqCst);
        }
    }

    #[async_std::test]
    async fn notifies_live_subscribers_and_drops_dead_ones() {
        let source = ObservableSource::new();
        let counter: Arc<dyn Subscriber> = Arc::new(Counter(AtomicUsize::new(0)));
        source.subscribe(&counter);
        assert_eq!(source.live_count(), 1);

        let f = crate::fact::Fact::new("List");
        source.notify(&[crate::fact::Envelope::unsigned(f)]).await;

        drop(counter);
        let f = crate::fact::Fact::new("List");
        source.notify(&[crate::fact::Envelope::unsigned(f)]).await;
        assert_eq!(source.live_count(), 0);
    }
}
