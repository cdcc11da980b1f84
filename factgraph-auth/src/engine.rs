//! Per-type rule evaluation.

use crate::error::AuthError;
use crate::rule::Rule;
use factgraph_core::{
    Condition, Envelope, FactError, MemoryStore, Projection, ProjectedValue, Query, Reference,
    Specification, Storage,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// What happens to a fact of a type with no registered rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationDefault {
    /// Admit it.
    Permissive,
    /// Reject it.
    Restrictive,
}

/// Evaluates registered rules against a fact's submitted evidence.
pub struct Engine {
    rules: HashMap<String, Vec<Rule>>,
    default: AuthorizationDefault,
    warned_none: Mutex<HashSet<String>>,
}

impl Engine {
    /// An engine with no rules, falling back to `default` for every type.
    pub fn new(default: AuthorizationDefault) -> Self {
        Self {
            rules: HashMap::new(),
            default,
            warned_none: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a rule for `fact_type`. Validates `Specification` rules
    /// eagerly so a successor-direction path or a malformed shape is
    /// rejected at registration time, never silently at evaluation time.
    pub fn register_rule(&mut self, fact_type: impl Into<String>, rule: Rule) -> Result<(), AuthError> {
        let fact_type = fact_type.into();
        if let Rule::Specification(spec) = &rule {
            validate_specification_rule(&fact_type, spec)?;
        }
        self.rules.entry(fact_type).or_default().push(rule);
        Ok(())
    }

    /// Decides whether `fact_type` may be saved given `evidence` (the
    /// submitter's claimed transitive predecessor closure, including the
    /// fact itself) and `author` (the submitting user's own reference).
    /// `storage` backs the suffix of legacy `Query` rules once the
    /// evidence-backed prefix has run.
    pub async fn authorize(
        &self,
        storage: &dyn Storage,
        fact_type: &str,
        fact_ref: &Reference,
        evidence: &[Envelope],
        author: &Reference,
    ) -> Result<(), AuthError> {
        let rules = match self.rules.get(fact_type) {
            Some(rules) => rules,
            None => {
                return match self.default {
                    AuthorizationDefault::Permissive => Ok(()),
                    AuthorizationDefault::Restrictive => Err(AuthError::Forbidden {
                        fact_type: fact_type.to_owned(),
                    }),
                }
            }
        };

        let evidence_store = build_evidence_store(evidence).await;
        for rule in rules {
            if self
                .evaluate(rule, storage, &evidence_store, fact_type, fact_ref, author)
                .await?
            {
                return Ok(());
            }
        }
        Err(AuthError::Forbidden {
            fact_type: fact_type.to_owned(),
        })
    }

    async fn evaluate(
        &self,
        rule: &Rule,
        storage: &dyn Storage,
        evidence_store: &MemoryStore,
        fact_type: &str,
        fact_ref: &Reference,
        author: &Reference,
    ) -> Result<bool, AuthError> {
        match rule {
            Rule::Any => Ok(true),
            Rule::None => {
                if self
                    .warned_none
                    .lock()
                    .expect("warned_none mutex poisoned")
                    .insert(fact_type.to_owned())
                {
                    tracing::warn!(fact_type, "type has a None rule; no submission will ever be authorized");
                }
                Ok(false)
            }
            Rule::Query {
                evidence_steps,
                storage_steps,
            } => {
                let after_evidence = evidence_store
                    .query(fact_ref, &Query { steps: evidence_steps.clone() })
                    .await?;
                let mut matched = after_evidence.iter().any(|r| r == author);
                if !matched && !storage_steps.is_empty() {
                    for intermediate in &after_evidence {
                        let final_set = storage
                            .query(intermediate, &Query { steps: storage_steps.clone() })
                            .await?;
                        if final_set.iter().any(|r| r == author) {
                            matched = true;
                            break;
                        }
                    }
                }
                Ok(matched)
            }
            Rule::Specification(spec) => {
                let given = vec![(spec.given[0].0.clone(), fact_ref.clone())];
                let results = match evidence_store.read(&given, spec).await {
                    Ok(results) => results,
                    Err(FactError::NotFound(_)) | Err(FactError::Corrupt(_)) => return Ok(false),
                    Err(err) => return Err(err.into()),
                };
                Ok(results
                    .iter()
                    .any(|value| matches!(value, ProjectedValue::Reference(r) if r == author)))
            }
        }
    }
}

/// Builds a private store containing exactly the submitted evidence. Saves
/// are applied in repeated passes so predecessors need not already be in
/// topological order; envelopes left unsaved after a pass makes no
/// progress indicate the evidence closure is incomplete, which the caller
/// treats as "fails closed" rather than an error.
async fn build_evidence_store(evidence: &[Envelope]) -> MemoryStore {
    let store = MemoryStore::new();
    let mut remaining: Vec<Envelope> = evidence.to_vec();
    loop {
        let before = remaining.len();
        let mut still_pending = Vec::new();
        for envelope in remaining {
            if store.save(vec![envelope.clone()]).await.is_err() {
                still_pending.push(envelope);
            }
        }
        remaining = still_pending;
        if remaining.is_empty() || remaining.len() == before {
            break;
        }
    }
    store
}

fn validate_specification_rule(fact_type: &str, spec: &Specification) -> Result<(), AuthError> {
    if spec.given.len() != 1 {
        return Err(AuthError::RuleMalformed {
            fact_type: fact_type.to_owned(),
            reason: "a specification rule must have exactly one given".to_owned(),
        });
    }
    if !matches!(spec.projection, Projection::Label(_)) {
        return Err(AuthError::RuleMalformed {
            fact_type: fact_type.to_owned(),
            reason: "a specification rule's projection must be a single label".to_owned(),
        });
    }
    if spec.has_successor_path() {
        return Err(AuthError::RuleMalformed {
            fact_type: fact_type.to_owned(),
            reason: "successor-direction paths cannot be proven from evidence alone".to_owned(),
        });
    }
    for m in &spec.matches {
        for c in &m.conditions {
            if let Condition::Existential(e) = c {
                for nested in &e.matches {
                    if nested.has_successor_path() {
                        return Err(AuthError::RuleMalformed {
                            fact_type: fact_type.to_owned(),
                            reason: "successor-direction paths cannot be proven from evidence alone"
                                .to_owned(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}
