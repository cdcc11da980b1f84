//! Authorization rule kinds.

use factgraph_core::{Query, Specification, Step};

/// One way of deciding whether a fact of a given type may be saved.
///
/// A [`crate::engine::Engine`] tries every rule registered for a type in
/// order and admits the fact if any rule is satisfied.
#[derive(Clone, Debug)]
pub enum Rule {
    /// Always authorized.
    Any,
    /// Never authorized. Evaluating this rule traces a warning the first
    /// time its fact type is seen.
    None,
    /// A legacy step query. `evidence_steps` runs against the submitter's
    /// evidence closure; `storage_steps` continues the walk against
    /// storage from wherever the evidence walk left off. The rule is
    /// satisfied if the author's own reference appears in the final set.
    Query {
        /// Steps executed against evidence only.
        evidence_steps: Vec<Step>,
        /// Steps executed against storage, continuing from the evidence walk.
        storage_steps: Vec<Step>,
    },
    /// A specification evaluated entirely against evidence. Must have
    /// exactly one `given` (the fact under authorization) and a
    /// single-label projection naming the permitted author; must not
    /// contain a successor-direction path.
    Specification(Specification),
}

impl Rule {
    /// Builds a `Query` rule whose entire walk runs against evidence.
    pub fn query_over_evidence(steps: Vec<Step>) -> Self {
        Rule::Query {
            evidence_steps: steps,
            storage_steps: Vec::new(),
        }
    }

    /// Convenience: wraps a ready-made evidence-only query.
    pub fn from_query(query: Query) -> Self {
        Self::query_over_evidence(query.steps)
    }
}
