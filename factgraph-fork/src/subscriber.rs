//! Manages a single remote feed stream, shared by refcount across observers.

use crate::error::ForkError;
use crate::remote::{RemoteFeed, RemoteStore};
use factgraph_core::{Envelope, Storage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Invoked with every envelope newly ingested from the remote feed.
pub type NotifyFactsAdded = Box<dyn Fn(&[Envelope]) + Send + Sync>;

struct StreamState {
    opened_at: Option<Instant>,
    initialized: bool,
}

/// A refcounted subscription to one remote feed.
pub struct Subscriber {
    storage: Arc<dyn Storage>,
    remote_feed: Arc<dyn RemoteFeed>,
    remote_store: Arc<dyn RemoteStore>,
    feed_name: String,
    reconnect_interval: Duration,
    notify_facts_added: NotifyFactsAdded,
    refcount: AtomicUsize,
    stream: Mutex<StreamState>,
}

impl Subscriber {
    /// Builds a subscriber for `feed_name`. Inert until [`Subscriber::add_ref`]
    /// reports the first acquisition and the caller calls [`Subscriber::start`].
    pub fn new(
        storage: Arc<dyn Storage>,
        remote_feed: Arc<dyn RemoteFeed>,
        remote_store: Arc<dyn RemoteStore>,
        feed_name: impl Into<String>,
        reconnect_interval: Duration,
        notify_facts_added: NotifyFactsAdded,
    ) -> Self {
        Self {
            storage,
            remote_feed,
            remote_store,
            feed_name: feed_name.into(),
            reconnect_interval,
            notify_facts_added,
            refcount: AtomicUsize::new(0),
            stream: Mutex::new(StreamState {
                opened_at: None,
                initialized: false,
            }),
        }
    }

    /// Registers another interested observer. Returns `true` on the first
    /// acquisition, signaling the caller to invoke [`Subscriber::start`].
    pub fn add_ref(&self) -> bool {
        self.refcount.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Releases an observer's interest. Returns `true` on the last release,
    /// signaling the caller to invoke [`Subscriber::stop`].
    pub fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Opens the stream and blocks until the first server response (or
    /// error) has been processed.
    #[tracing::instrument(skip(self), fields(feed = %self.feed_name))]
    pub async fn start(&self) -> Result<(), ForkError> {
        self.stream.lock().opened_at = Some(Instant::now());
        self.poll_once().await?;
        self.stream.lock().initialized = true;
        Ok(())
    }

    /// Whether `start` has completed its first round-trip.
    pub fn initialized(&self) -> bool {
        self.stream.lock().initialized
    }

    /// Marks this subscriber as no longer streaming. No further polls take
    /// effect after this returns.
    pub fn stop(&self) {
        self.stream.lock().opened_at = None;
    }

    /// One poll-and-ingest round trip: fetches the feed's next batch past
    /// the persisted bookmark, hydrates references not already known
    /// locally, saves them, and advances the bookmark. Forces a fresh
    /// connection (by resetting the open time) once `reconnect_interval`
    /// has elapsed, matching the reference transport's four-minute recycle.
    pub async fn poll_once(&self) -> Result<(), ForkError> {
        {
            let mut stream = self.stream.lock();
            let opened_at = stream.opened_at.get_or_insert_with(Instant::now);
            if opened_at.elapsed() >= self.reconnect_interval {
                *opened_at = Instant::now();
                tracing::debug!(feed = %self.feed_name, "forcing feed reconnect");
            }
        }

        let bookmark = self.storage.load_bookmark(&self.feed_name).await?;
        let batch = self.remote_feed.poll(bookmark.as_deref()).await?;

        let existing = self.storage.which_exist(&batch.references).await?;
        let unknown: Vec<_> = batch
            .references
            .iter()
            .filter(|r| !existing.contains(r))
            .cloned()
            .collect();

        let fetched = if unknown.is_empty() {
            Vec::new()
        } else {
            self.remote_store.load(&unknown).await?
        };

        // Saved before the bookmark advances so no observer ever sees the
        // bookmark move past facts it hasn't received yet. `MemoryStore`
        // serializes both calls under one lock; a backend without that
        // guarantee must provide its own.
        let saved = self.storage.save(fetched).await?;
        self.storage
            .save_bookmark(&self.feed_name, batch.next_bookmark)
            .await?;

        if !saved.is_empty() {
            (self.notify_facts_added)(&saved);
        }
        Ok(())
    }
}
