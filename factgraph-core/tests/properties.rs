//! Property-based tests for the universal invariants named in this design:
//! hash stability, save idempotence, ancestor closure, query monotonicity
//! under adds, and existential symmetry.
//!
//! `proptest` generates the inputs; each property runs its async assertions
//! through `async_std::task::block_on` since `proptest!` itself only drives
//! synchronous closures.

use factgraph_core::{
    reference, Condition, Envelope, Fact, FieldValue, Match, MemoryStore, PathCondition,
    Projection, Reference as FactReference, Role, Specification, Storage,
};
use proptest::prelude::*;
use std::collections::HashSet;

fn simple_fact(fact_type: &str, tag: &str, n: i64) -> Fact {
    Fact::new(fact_type)
        .with_field("tag", FieldValue::String(tag.to_owned()))
        .with_field("n", FieldValue::Number(n as f64))
}

proptest! {
    /// Invariant 1: two independent canonicalizations of the same fact
    /// produce byte-identical output and identical hashes, regardless of
    /// the field/tag content.
    #[test]
    fn hash_is_stable_across_arbitrary_fields(
        tag in "[a-zA-Z0-9_]{0,12}",
        n in any::<i64>(),
        flag in any::<bool>(),
    ) {
        let fact = simple_fact("Widget", &tag, n).with_field("flag", FieldValue::Bool(flag));
        let h1 = factgraph_core::hash(&fact).unwrap();
        let h2 = factgraph_core::hash(&fact).unwrap();
        prop_assert_eq!(h1, h2);
        prop_assert_eq!(
            factgraph_core::canonicalize(&fact).unwrap(),
            factgraph_core::canonicalize(&fact).unwrap()
        );
    }

    /// Invariant 2: saving the same envelope twice yields exactly one
    /// newly-written envelope, however many distinct facts are involved.
    #[test]
    fn save_is_idempotent_over_arbitrary_batches(
        tags in prop::collection::vec("[a-zA-Z0-9_]{1,8}", 1..8),
    ) {
        async_std::task::block_on(async move {
            let store = MemoryStore::new();
            let envelopes: Vec<Envelope> = tags
                .iter()
                .enumerate()
                .map(|(i, tag)| Envelope::unsigned(simple_fact("Widget", tag, i as i64)))
                .collect();

            let first = store.save(envelopes.clone()).await.unwrap();
            let second = store.save(envelopes.clone()).await.unwrap();

            let distinct: HashSet<FactReference> = envelopes
                .iter()
                .map(|e| e.reference().unwrap())
                .collect();
            prop_assert_eq!(first.len(), distinct.len());
            prop_assert_eq!(second.len(), 0);
        })?;
    }

    /// Invariant 3: `load` on a fact's reference returns exactly its
    /// ancestor set -- every fact in a randomly generated chain, and
    /// nothing outside it.
    #[test]
    fn load_returns_exactly_the_ancestor_set(
        chain_len in 1usize..6,
    ) {
        async_std::task::block_on(async move {
            let store = MemoryStore::new();
            let mut refs = Vec::new();
            for i in 0..chain_len {
                let predecessors = refs.last().cloned().map(|r: FactReference| vec![r]).unwrap_or_default();
                let fact = Fact::new("Link")
                    .with_field("n", FieldValue::Number(i as f64))
                    .with_predecessors("prev", predecessors);
                let r = reference(&fact).unwrap();
                store.save(vec![Envelope::unsigned(fact)]).await.unwrap();
                refs.push(r);
            }

            let tail = refs.last().unwrap().clone();
            let closure = store.load(&[tail]).await.unwrap();
            let closure_refs: HashSet<FactReference> =
                closure.iter().map(|e| e.reference().unwrap()).collect();
            let expected: HashSet<FactReference> = refs.into_iter().collect();
            prop_assert_eq!(closure_refs, expected);
        })?;
    }

    /// Invariant 4: for a specification with no `NotExists`, the result set
    /// never shrinks as distinct matching facts are added.
    #[test]
    fn query_result_grows_monotonically_under_adds(
        descriptions in prop::collection::vec("[a-z]{1,10}", 1..6),
    ) {
        async_std::task::block_on(async move {
            let store = MemoryStore::new();
            let list = Fact::new("List").with_field("name", FieldValue::String("chores".into()));
            let list_ref = reference(&list).unwrap();
            store.save(vec![Envelope::unsigned(list)]).await.unwrap();

            let spec = tasks_of_list_spec();
            let given = vec![("list".into(), list_ref.clone())];

            let mut seen: HashSet<String> = HashSet::new();
            let mut previous_len = 0;
            for description in descriptions {
                if !seen.insert(description.clone()) {
                    continue; // duplicate description would hash-collide to the same fact
                }
                let task = Fact::new("Task")
                    .with_field("description", FieldValue::String(description))
                    .with_predecessors("list", vec![list_ref.clone()]);
                store.save(vec![Envelope::unsigned(task)]).await.unwrap();

                let results = store.read(&given, &spec).await.unwrap();
                prop_assert!(results.len() >= previous_len);
                previous_len = results.len();
            }
        })?;
    }

    /// Invariant 5: toggling `exists` on an existential clause partitions
    /// the universe -- every task is reported by exactly one of the two
    /// specifications, never both, never neither.
    #[test]
    fn existential_toggle_partitions_the_universe(
        completed in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        async_std::task::block_on(async move {
            let store = MemoryStore::new();
            let list = Fact::new("List").with_field("name", FieldValue::String("chores".into()));
            let list_ref = reference(&list).unwrap();
            store.save(vec![Envelope::unsigned(list)]).await.unwrap();

            let mut task_refs = Vec::new();
            for (i, is_complete) in completed.iter().enumerate() {
                let task = Fact::new("Task")
                    .with_field("description", FieldValue::String(format!("task-{i}")))
                    .with_predecessors("list", vec![list_ref.clone()]);
                let task_ref = reference(&task).unwrap();
                store.save(vec![Envelope::unsigned(task)]).await.unwrap();
                if *is_complete {
                    let complete = Fact::new("TaskComplete")
                        .with_field("completed", FieldValue::Bool(true))
                        .with_predecessors("task", vec![task_ref.clone()]);
                    store.save(vec![Envelope::unsigned(complete)]).await.unwrap();
                }
                task_refs.push(task_ref);
            }

            let given = vec![("list".into(), list_ref.clone())];
            let with_evidence = store.read(&given, &tasks_with_completion_spec(true)).await.unwrap();
            let without_evidence = store.read(&given, &tasks_with_completion_spec(false)).await.unwrap();

            prop_assert_eq!(with_evidence.len() + without_evidence.len(), task_refs.len());
            let with_set: HashSet<_> = with_evidence.into_iter().collect();
            let without_set: HashSet<_> = without_evidence.into_iter().collect();
            prop_assert!(with_set.is_disjoint(&without_set));
        })?;
    }
}

fn tasks_of_list_spec() -> Specification {
    Specification {
        given: vec![("list".into(), "List".into())],
        matches: vec![Match {
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

fn tasks_with_completion_spec(exists: bool) -> Specification {
    Specification {
        given: vec![("list".into(), "List".into())],
        matches: vec![Match {
            unknown: "task".into(),
            unknown_type: "Task".into(),
            conditions: vec![
                Condition::Path(PathCondition {
                    roles_right: vec![],
                    label_right: "list".into(),
                    roles_left: vec![Role::new("list", "List")],
                }),
                Condition::Existential(factgraph_core::ExistentialCondition {
                    exists,
                    matches: vec![Match {
                        unknown: "complete".into(),
                        unknown_type: "TaskComplete".into(),
                        conditions: vec![Condition::Path(PathCondition {
                            roles_right: vec![],
                            label_right: "task".into(),
                            roles_left: vec![Role::new("task", "Task")],
                        })],
                    }],
                }),
            ],
        }],
        projection: Projection::Label("task".into()),
    }
}
