//! [`FactManager`]: the coordinator wiring together storage, authorization,
//! observation and the fork/queue write path.

use crate::config::EngineConfig;
use anyhow::{Context, Result};
use factgraph_auth::{Engine, Rule};
use factgraph_core::{
    AddedCallback, Envelope, ObservableSource, Observer, Query, Reference, RemovedCallback,
    Specification, Storage,
};
use factgraph_fork::{Authenticator, Fork, NullRemote, RemoteFeed, RemoteStore, Subscriber};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Composes a storage backend, the authorization engine, the observable
/// source, and the fork/queue write path into one running engine.
///
/// Mirrors the grounding crate's split between opening a backend and
/// turning it into a running engine: build storage and a remote binding
/// first, hand them to [`FactManager::new`], register rules, then start
/// saving and observing.
pub struct FactManager {
    storage: Arc<dyn Storage>,
    auth: Engine,
    observable: ObservableSource,
    fork: Fork,
    authenticator: Arc<dyn Authenticator>,
    remote_feed: Arc<dyn RemoteFeed>,
    remote_store: Arc<dyn RemoteStore>,
    feed_reconnect_interval: std::time::Duration,
    subscribers: Mutex<HashMap<String, Arc<Subscriber>>>,
    /// Envelopes a feed subscriber has ingested but this manager hasn't yet
    /// fanned out to observers. `Subscriber::poll_once`'s callback runs
    /// synchronously from inside the poll; draining and notifying happens
    /// afterward, from async context, in `poll_feed`.
    feed_inbox: Arc<Mutex<Vec<Envelope>>>,
}

impl FactManager {
    /// Builds a manager with no remote collaborator: a local-only engine
    /// over `storage`.
    pub fn local(storage: Arc<dyn Storage>, config: EngineConfig) -> Self {
        Self::new(
            storage,
            Arc::new(NullRemote),
            Arc::new(NullRemote),
            Arc::new(LocalAuthenticator),
            config,
        )
    }

    /// Builds a manager backed by a concrete remote collaborator.
    pub fn new(
        storage: Arc<dyn Storage>,
        remote_store: Arc<dyn RemoteStore>,
        remote_feed: Arc<dyn RemoteFeed>,
        authenticator: Arc<dyn Authenticator>,
        config: EngineConfig,
    ) -> Self {
        let fork = Fork::new(
            storage.clone(),
            remote_store.clone(),
            authenticator.clone(),
            config.fork_mode,
            config.outbox_retry_backoff,
        );
        Self {
            storage,
            auth: Engine::new(config.authorization_default),
            observable: ObservableSource::new(),
            fork,
            authenticator,
            remote_feed,
            remote_store,
            feed_reconnect_interval: config.feed_reconnect_interval,
            subscribers: Mutex::new(HashMap::new()),
            feed_inbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers an authorization rule for `fact_type`. A successor-path
    /// specification rule is rejected here, at configuration time.
    pub fn register_rule(&mut self, fact_type: impl Into<String>, rule: Rule) -> Result<()> {
        self.auth
            .register_rule(fact_type, rule)
            .context("registering authorization rule")
    }

    /// Authorizes and saves one fact, given the submitter's claimed
    /// predecessor-closure evidence. Returns `None` if the fact was already
    /// present (save is idempotent). Notifies every live observer on
    /// success.
    #[tracing::instrument(skip(self, envelope, evidence))]
    pub async fn save(&self, envelope: Envelope, evidence: Vec<Envelope>) -> Result<Option<Envelope>> {
        let fact_ref = envelope.reference().context("hashing submitted fact")?;
        let author = self.authenticator.user_identity();
        self.auth
            .authorize(
                self.storage.as_ref(),
                &envelope.fact.fact_type,
                &fact_ref,
                &evidence,
                &author,
            )
            .await
            .context("authorizing fact")?;

        let saved = self.fork.save(vec![envelope]).await?;
        self.observable.notify(&saved).await;
        Ok(saved.into_iter().next())
    }

    /// Runs a legacy step query starting from `start`.
    pub async fn query(&self, start: &Reference, query: &Query) -> Result<Vec<Reference>> {
        Ok(self.storage.query(start, query).await?)
    }

    /// Starts a reactive subscription to `spec`, bound by `given`. The
    /// returned observer must be kept alive (held by the caller) for the
    /// subscription to keep receiving updates -- `ObservableSource` only
    /// holds a weak reference to it.
    pub async fn observe<H: Send + 'static>(
        &self,
        given: Vec<(String, Reference)>,
        spec: Specification,
        added: AddedCallback<H>,
        removed: RemovedCallback<H>,
    ) -> Result<Arc<Observer<H>>> {
        let observer = Observer::new(self.storage.clone(), given, spec, added, removed);
        observer.start().await.context("running initial specification")?;
        let subscriber: Arc<dyn factgraph_core::observable::Subscriber> = observer.clone();
        self.observable.subscribe(&subscriber);
        Ok(observer)
    }

    /// Acquires (creating if necessary) the shared subscriber for `feed_name`,
    /// bumping its refcount. The returned handle's [`Subscriber::release`]
    /// must be called exactly once to release this acquisition.
    pub async fn acquire_feed(&self, feed_name: &str) -> Result<Arc<Subscriber>> {
        let mut subscribers = self.subscribers.lock();
        let subscriber = subscribers
            .entry(feed_name.to_owned())
            .or_insert_with(|| {
                let inbox = self.feed_inbox.clone();
                Arc::new(Subscriber::new(
                    self.storage.clone(),
                    self.remote_feed.clone(),
                    self.remote_store.clone(),
                    feed_name.to_owned(),
                    self.feed_reconnect_interval,
                    Box::new(move |envelopes| inbox.lock().extend_from_slice(envelopes)),
                ))
            })
            .clone();
        let is_first = subscriber.add_ref();
        drop(subscribers);
        if is_first {
            subscriber.start().await?;
            self.flush_feed_inbox().await;
        }
        Ok(subscriber)
    }

    /// Releases a previously acquired feed subscription, stopping it once
    /// the last observer has released it.
    pub fn release_feed(&self, feed_name: &str, subscriber: &Subscriber) {
        if subscriber.release() {
            subscriber.stop();
            self.subscribers.lock().remove(feed_name);
        }
    }

    /// Runs one poll-and-ingest round for an already-acquired subscriber,
    /// then fans out any newly ingested facts to live observers.
    pub async fn poll_feed(&self, subscriber: &Subscriber) -> Result<()> {
        subscriber.poll_once().await?;
        self.flush_feed_inbox().await;
        Ok(())
    }

    async fn flush_feed_inbox(&self) {
        let drained: Vec<Envelope> = std::mem::take(&mut *self.feed_inbox.lock());
        self.observable.notify(&drained).await;
    }

    /// Drains the persistent fork's outbox once. A no-op in `PassThrough`
    /// and `Transient` modes (their outbox is always empty).
    pub async fn drain_outbox(&self) -> factgraph_fork::DrainReport {
        self.fork.drain_once().await
    }
}

/// An authenticator with no credentials to refresh, used by
/// [`FactManager::local`] where there is no remote to authenticate against.
struct LocalAuthenticator;

#[async_trait::async_trait]
impl Authenticator for LocalAuthenticator {
    fn user_identity(&self) -> Reference {
        Reference {
            fact_type: "LocalUser".to_owned(),
            hash: factgraph_core::Hash::from_bytes([0; 32]),
        }
    }

    async fn reauthenticate(&self) -> Result<(), factgraph_fork::ForkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factgraph_core::{Fact, FieldValue, MemoryStore, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[async_std::test]
    async fn save_runs_registered_rule_and_notifies_observers() {
        let mut manager = FactManager::local(Arc::new(MemoryStore::new()), EngineConfig::default());
        manager.register_rule("List", Rule::Any).unwrap();
        manager.register_rule("Task", Rule::Any).unwrap();

        let list = Fact::new("List").with_field("name", FieldValue::String("Chores".into()));
        let saved_list = manager
            .save(Envelope::unsigned(list), Vec::new())
            .await
            .unwrap()
            .expect("list is new");

        let added = Arc::new(AtomicUsize::new(0));
        let a = added.clone();
        let spec = Specification {
            given: vec![("list".into(), "List".into())],
            matches: vec![factgraph_core::Match {
                unknown: "task".into(),
                unknown_type: "Task".into(),
                conditions: vec![factgraph_core::Condition::Path(factgraph_core::PathCondition {
                    roles_right: vec![],
                    label_right: "list".into(),
                    roles_left: vec![Role::new("list", "List")],
                })],
            }],
            projection: factgraph_core::Projection::Label("task".into()),
        };
        let observer = manager
            .observe(
                vec![("list".into(), saved_list.reference().unwrap())],
                spec,
                Box::new(move |_| {
                    a.fetch_add(1, Ordering::SeqCst);
                }),
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 0);

        let task = Fact::new("Task")
            .with_predecessors("list", vec![saved_list.reference().unwrap()]);
        manager.save(Envelope::unsigned(task), Vec::new()).await.unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 1);
        drop(observer);
    }

    #[async_std::test]
    async fn save_is_forbidden_without_an_admitting_rule() {
        let mut manager = FactManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NullRemote),
            Arc::new(NullRemote),
            Arc::new(LocalAuthenticator),
            EngineConfig {
                authorization_default: factgraph_auth::AuthorizationDefault::Restrictive,
                ..EngineConfig::default()
            },
        );
        manager.register_rule("Task", Rule::None).unwrap();
        let result = manager
            .save(Envelope::unsigned(Fact::new("Task")), Vec::new())
            .await;
        assert!(result.is_err());
    }
}
