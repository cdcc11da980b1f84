//! Per-type authorization: decides whether a fact may be saved given the
//! submitter's claimed evidence (its transitive predecessor closure).
//!
//! Nothing here touches storage for writes -- `Engine::authorize` only
//! reads, and only the evidence a caller submits alongside the fact, plus
//! (for legacy `Query` rules) the real storage for steps beyond what
//! evidence alone can prove.

pub mod engine;
pub mod error;
pub mod rule;

pub use engine::{AuthorizationDefault, Engine};
pub use error::AuthError;
pub use rule::Rule;
