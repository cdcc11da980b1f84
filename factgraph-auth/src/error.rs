/// Errors surfaced by the authorization engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No registered rule for the fact's type admitted it, or the type has
    /// no rules and the engine's default policy is restrictive.
    #[error("fact of type {fact_type} was not authorized")]
    Forbidden {
        /// The fact type that was rejected.
        fact_type: String,
    },

    /// A rule was registered that this engine cannot evaluate safely -- a
    /// specification rule with a successor-direction path, or one with more
    /// than one `given` or a non-label projection.
    #[error("rule for {fact_type} is malformed: {reason}")]
    RuleMalformed {
        /// The fact type the rule was registered for.
        fact_type: String,
        /// Human readable description of the problem.
        reason: String,
    },

    /// The underlying query/specification evaluation failed for a reason
    /// other than missing evidence (which fails the rule, not the engine).
    #[error(transparent)]
    Evaluation(#[from] factgraph_core::FactError),
}
