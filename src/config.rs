//! Engine configuration: an ordinary struct with `Default`, not a builder.

use factgraph_auth::AuthorizationDefault;
use factgraph_fork::{ForkMode, RetryBackoff};
use std::time::Duration;

/// How long a feed subscription keeps one connection open before forcing a
/// reconnect, independent of any application-level traffic.
pub const DEFAULT_FEED_RECONNECT_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Configures a [`crate::FactManager`]. `Default::default()` produces a
/// local-only, permissive, `PassThrough` engine -- no remote, no rules.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How saves reach a remote collaborator, if any.
    pub fork_mode: ForkMode,
    /// What happens to a fact type with no registered authorization rule.
    pub authorization_default: AuthorizationDefault,
    /// How often a feed subscription forces a fresh connection.
    pub feed_reconnect_interval: Duration,
    /// Initial and capped backoff for the persistent fork's retry loop.
    pub outbox_retry_backoff: RetryBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fork_mode: ForkMode::PassThrough,
            authorization_default: AuthorizationDefault::Permissive,
            feed_reconnect_interval: DEFAULT_FEED_RECONNECT_INTERVAL,
            outbox_retry_backoff: RetryBackoff::default(),
        }
    }
}
