//! Reactive specification subscriptions.
//!
//! An [`Observer`] runs a [`Specification`] once to establish its initial
//! result set, then re-runs it each time [`crate::observable::ObservableSource`]
//! reports new facts, delivering only the delta to `added`/`removed`. A
//! result is delivered to `added` at most once and to `removed` at most
//! once per delivery to `added` -- `row_key` explains how that is kept
//! true by diffing on a canonical string key rather than `ProjectedValue`
//! equality.

use crate::error::FactError;
use crate::fact::Reference;
use crate::observable::Subscriber;
use crate::query::{ProjectedValue, Specification};
use crate::storage::Storage;
use async_trait::async_trait;
use futures::lock::Mutex as AsyncMutex;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Invoked once for each tuple newly added to an observer's live result set.
/// Its return value is the tuple's *handle* -- whatever the caller wants to
/// associate with it (owned UI state, a subscription id, or just `()`) --
/// which is threaded back to [`RemovedCallback`] when the tuple is later
/// invalidated, per §4.4's "`removed` receives the handle returned by
/// `added` (if any)".
pub type AddedCallback<H> = Box<dyn Fn(&ProjectedValue) -> H + Send + Sync>;

/// Invoked once for each tuple dropped from an observer's live result set,
/// with the handle `AddedCallback` returned for that tuple.
pub type RemovedCallback<H> = Box<dyn Fn(H) + Send + Sync>;

/// A canonical key for a projected value, used purely to diff result sets
/// without requiring `ProjectedValue` to implement `Hash` (its `Collection`
/// variant holds nested values evaluated lazily and isn't a stable
/// dictionary key in the way a single reference is).
fn row_key(value: &ProjectedValue) -> String {
    fn write(buf: &mut String, value: &ProjectedValue) {
        match value {
            ProjectedValue::Reference(r) => buf.push_str(&r.to_string()),
            ProjectedValue::Tuple(vs) => {
                buf.push('(');
                for v in vs {
                    write(buf, v);
                    buf.push(',');
                }
                buf.push(')');
            }
            ProjectedValue::Record(fs) => {
                buf.push('{');
                for (name, v) in fs {
                    buf.push_str(name);
                    buf.push(':');
                    write(buf, v);
                    buf.push(',');
                }
                buf.push('}');
            }
            ProjectedValue::Collection(vs) => {
                buf.push('[');
                for v in vs {
                    write(buf, v);
                    buf.push(',');
                }
                buf.push(']');
            }
        }
    }
    let mut buf = String::new();
    write(&mut buf, value);
    buf
}

struct State<H> {
    /// Keys of the currently-live tuples, in the order `read` returned them.
    order: Vec<String>,
    /// Each live tuple's handle, as returned by `added`.
    handles: HashMap<String, H>,
    initialized: bool,
}

/// A live subscription to a specification, re-evaluated as new facts arrive.
///
/// `H` is the handle type `added` may return for a tuple and `removed` later
/// receives for that same tuple (§4.4); an observer with no use for one
/// instantiates `H = ()`, the default.
pub struct Observer<H = ()> {
    storage: Arc<dyn Storage>,
    given: Vec<(String, Reference)>,
    spec: Specification,
    added: AddedCallback<H>,
    removed: RemovedCallback<H>,
    state: Mutex<State<H>>,
    stopped: AtomicBool,
    /// Serializes `refresh` end-to-end (read-then-diff, not just the diff)
    /// across concurrent `notify` calls, so two save batches landing on the
    /// same observer at once can never interleave and double-deliver a
    /// tuple -- §5's "never two callbacks for the same observer
    /// concurrently" held even under a multi-threaded executor.
    dispatch: AsyncMutex<()>,
}

impl<H: Send + 'static> Observer<H> {
    /// Builds an observer. Call [`Observer::start`] to run the first
    /// evaluation and begin delivering results.
    pub fn new(
        storage: Arc<dyn Storage>,
        given: Vec<(String, Reference)>,
        spec: Specification,
        added: AddedCallback<H>,
        removed: RemovedCallback<H>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            given,
            spec,
            added,
            removed,
            state: Mutex::new(State {
                order: Vec::new(),
                handles: HashMap::new(),
                initialized: false,
            }),
            stopped: AtomicBool::new(false),
            dispatch: AsyncMutex::new(()),
        })
    }

    /// Runs the specification for the first time, delivering every initial
    /// result to `added` before returning. Idempotent: calling `start` again
    /// on an already-initialized observer is a no-op.
    pub async fn start(&self) -> Result<(), FactError> {
        if self.state.lock().initialized {
            return Ok(());
        }
        let results = self.storage.read(&self.given, &self.spec).await?;
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(());
        }
        let mut order = Vec::with_capacity(results.len());
        for value in &results {
            let key = row_key(value);
            let handle = (self.added)(value);
            state.handles.insert(key.clone(), handle);
            order.push(key);
        }
        state.order = order;
        state.initialized = true;
        Ok(())
    }

    /// Whether the first evaluation has completed.
    pub fn initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Stops delivering further updates. Already-delivered results are not
    /// retracted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn refresh(&self) -> Result<(), FactError> {
        if self.stopped.load(Ordering::SeqCst) || !self.initialized() {
            return Ok(());
        }
        let results = self.storage.read(&self.given, &self.spec).await?;
        let next_keys: Vec<String> = results.iter().map(row_key).collect();

        let mut state = self.state.lock();
        let removed_handles: Vec<H> = state
            .order
            .iter()
            .filter(|k| !next_keys.contains(k))
            .filter_map(|k| state.handles.remove(k))
            .collect();

        let mut new_handles = Vec::new();
        for (key, value) in next_keys.iter().zip(results.iter()) {
            if !state.handles.contains_key(key) {
                new_handles.push((key.clone(), (self.added)(value)));
            }
        }
        for (key, handle) in new_handles {
            state.handles.insert(key, handle);
        }
        state.order = next_keys;
        drop(state);

        for handle in removed_handles {
            (self.removed)(handle);
        }
        Ok(())
    }
}

#[async_trait]
impl<H: Send + 'static> Subscriber for Observer<H> {
    async fn notify(&self, envelopes: &[crate::fact::Envelope]) {
        if envelopes.is_empty() {
            return;
        }
        let _dispatch = self.dispatch.lock().await;
        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "observer refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{reference, Envelope, Fact, FieldValue};
    use crate::observable::ObservableSource;
    use crate::query::{Condition, PathCondition, Projection, Role};
    use crate::store_memory::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn tasks_of_list_spec() -> Specification {
        Specification {
            given: vec![("list".into(), "List".into())],
            matches: vec![crate::query::Match {
                unknown: "task".into(),
                unknown_type: "Task".into(),
                conditions: vec![Condition::Path(PathCondition {
                    roles_right: vec![],
                    label_right: "list".into(),
                    roles_left: vec![Role::new("list", "List")],
                })],
            }],
            projection: Projection::Label("task".into()),
        }
    }

    #[async_std::test]
    async fn delivers_added_then_removed_on_refresh() {
        let store = Arc::new(MemoryStore::new());
        let list = Fact::new("List").with_field("name", FieldValue::String("Chores".into()));
        let list_ref = reference(&list).unwrap();
        store.save(vec![Envelope::unsigned(list)]).await.unwrap();

        let added_count = Arc::new(AtomicUsize::new(0));
        let removed_count = Arc::new(AtomicUsize::new(0));
        let a = added_count.clone();
        let r = removed_count.clone();

        let observer = Observer::new(
            store.clone(),
            vec![("list".into(), list_ref.clone())],
            tasks_of_list_spec(),
            Box::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        );
        observer.start().await.unwrap();
        assert_eq!(added_count.load(Ordering::SeqCst), 0);

        let source = ObservableSource::new();
        let subscriber: Arc<dyn Subscriber> = observer.clone();
        source.subscribe(&subscriber);

        let task = Fact::new("Task").with_predecessors("list", vec![list_ref.clone()]);
        let task_ref = reference(&task).unwrap();
        let saved = store.save(vec![Envelope::unsigned(task)]).await.unwrap();
        source.notify(&saved).await;
        assert_eq!(added_count.load(Ordering::SeqCst), 1);

        observer.stop();
        let other = Fact::new("Task")
            .with_field("description", FieldValue::String("second".into()))
            .with_predecessors("list", vec![list_ref]);
        let saved = store.save(vec![Envelope::unsigned(other)]).await.unwrap();
        source.notify(&saved).await;
        // observer stopped: refresh is a no-op, count unchanged.
        assert_eq!(added_count.load(Ordering::SeqCst), 1);
        let _ = task_ref;
    }
}
