//! End-to-end scenarios that exercise the composed engine across crate
//! boundaries: a persistent fork replaying queued writes once a remote
//! comes back, and a feed subscriber deduplicating a batch that names a
//! fact already known locally.
//!
//! Installs the global tracing subscriber the way the grounding crate's own
//! `Migrate::new` does, scoped here to the test harness rather than to any
//! library entry point (the library itself never installs a subscriber).

use anyhow::Result;
use async_trait::async_trait;
use factgraph::{
    Authenticator, Envelope, EngineConfig, Fact, FactManager, FeedBatch, FieldValue, ForkError,
    ForkMode, MemoryStore, OutboundOutcome, Reference, RemoteFeed, RemoteStore, RetryBackoff,
    Storage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_log::LogTracer::init().ok();
        let env = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV)
            .unwrap_or_else(|_| "warn".to_owned());
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(env))
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        log_panics::init();
    });
}

struct StaticAuth;

#[async_trait]
impl Authenticator for StaticAuth {
    fn user_identity(&self) -> Reference {
        factgraph_core::reference(&Fact::new("User")).unwrap()
    }

    async fn reauthenticate(&self) -> Result<(), ForkError> {
        Ok(())
    }
}

/// A remote that can be flipped offline/online, scripting §8 scenario S5.
struct FlakyRemote {
    online: AtomicBool,
    received: Mutex<Vec<Envelope>>,
}

impl FlakyRemote {
    fn new() -> Self {
        Self {
            online: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn save(&self, envelopes: Vec<Envelope>) -> Result<OutboundOutcome, ForkError> {
        if !self.online.load(Ordering::SeqCst) {
            return Ok(OutboundOutcome::Retryable);
        }
        self.received.lock().extend(envelopes);
        Ok(OutboundOutcome::Accepted)
    }

    async fn load(&self, _refs: &[Reference]) -> Result<Vec<Envelope>, ForkError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RemoteFeed for FlakyRemote {
    async fn poll(&self, bookmark: Option<&str>) -> Result<FeedBatch, ForkError> {
        Ok(FeedBatch {
            references: Vec::new(),
            next_bookmark: bookmark.unwrap_or_default().to_owned(),
        })
    }
}

#[async_std::test]
async fn s5_offline_replay_delivers_each_envelope_exactly_once() {
    init_tracing();
    let storage = Arc::new(MemoryStore::new());
    let remote = Arc::new(FlakyRemote::new());
    let manager = FactManager::new(
        storage.clone(),
        remote.clone(),
        remote.clone(),
        Arc::new(StaticAuth),
        EngineConfig {
            fork_mode: ForkMode::Persistent,
            outbox_retry_backoff: RetryBackoff {
                initial: Duration::from_millis(0),
                cap: Duration::from_millis(0),
                max_attempts: 10,
            },
            ..EngineConfig::default()
        },
    );

    let descriptions = ["trash", "dishes", "laundry"];
    let mut refs = Vec::new();
    for description in descriptions {
        let fact =
            Fact::new("Task").with_field("description", FieldValue::String(description.into()));
        refs.push(factgraph_core::reference(&fact).unwrap());
        manager
            .save(Envelope::unsigned(fact), Vec::new())
            .await
            .unwrap();
    }

    // Still disconnected: the outbox holds all three, draining makes no progress.
    let report = manager.drain_outbox().await;
    assert!(report.delivered.is_empty());

    remote.set_online(true);
    let mut delivered = 0;
    for _ in 0..descriptions.len() {
        delivered += manager.drain_outbox().await.delivered.len();
        if delivered == descriptions.len() {
            break;
        }
    }
    assert_eq!(delivered, descriptions.len());
    assert_eq!(remote.received.lock().len(), descriptions.len());

    // A further drain is a no-op: the outbox is empty, nothing is resent.
    assert!(manager.drain_outbox().await.delivered.is_empty());

    let present = storage.which_exist(&refs).await.unwrap();
    assert_eq!(present.len(), refs.len());
}

struct OneShotFeed {
    batch: Mutex<Option<FeedBatch>>,
}

#[async_trait]
impl RemoteFeed for OneShotFeed {
    async fn poll(&self, bookmark: Option<&str>) -> Result<FeedBatch, ForkError> {
        match self.batch.lock().take() {
            Some(batch) => Ok(batch),
            None => Ok(FeedBatch {
                references: Vec::new(),
                next_bookmark: bookmark.unwrap_or_default().to_owned(),
            }),
        }
    }
}

struct CountingLoad {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteStore for CountingLoad {
    async fn save(&self, _envelopes: Vec<Envelope>) -> Result<OutboundOutcome, ForkError> {
        Ok(OutboundOutcome::Accepted)
    }

    async fn load(&self, _refs: &[Reference]) -> Result<Vec<Envelope>, ForkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[async_std::test]
async fn s6_deduplicating_ingest_skips_already_known_facts() {
    init_tracing();
    let storage = Arc::new(MemoryStore::new());
    let existing = Fact::new("List").with_field("name", FieldValue::String("Chores".into()));
    let existing_ref = factgraph_core::reference(&existing).unwrap();
    storage.save(vec![Envelope::unsigned(existing)]).await.unwrap();

    let load = Arc::new(CountingLoad {
        calls: AtomicUsize::new(0),
    });
    let feed = Arc::new(OneShotFeed {
        batch: Mutex::new(Some(FeedBatch {
            references: vec![existing_ref.clone()],
            next_bookmark: "batch-1".into(),
        })),
    });

    let manager = FactManager::new(
        storage.clone(),
        load.clone(),
        feed,
        Arc::new(StaticAuth),
        EngineConfig::default(),
    );

    let subscriber = manager.acquire_feed("chores").await.unwrap();

    // The batch's bookmark is persisted even though it named nothing novel.
    assert_eq!(
        storage.load_bookmark("chores").await.unwrap(),
        Some("batch-1".into())
    );
    // Already-known references are filtered out before hydration; the
    // remote's `load` is never called for a batch containing only those.
    assert_eq!(load.calls.load(Ordering::SeqCst), 0);
    // No duplicate save occurred: the fact is exactly the one already there.
    assert_eq!(storage.which_exist(&[existing_ref]).await.unwrap().len(), 1);

    manager.release_feed("chores", &subscriber);
}
