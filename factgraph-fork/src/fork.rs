//! The write-path split: local-only, inline-remote, or a durable outbox.

use crate::error::ForkError;
use crate::remote::{Authenticator, OutboundOutcome, RemoteStore};
use factgraph_core::{Envelope, Reference, Storage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which write path a [`Fork`] uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkMode {
    /// Purely local; no remote interaction.
    PassThrough,
    /// Attempts a remote send inline with each save; failure surfaces immediately.
    Transient,
    /// Local save always succeeds synchronously; remote delivery happens via
    /// a durable outbox drained by [`Fork::drain_once`].
    Persistent,
}

/// Initial and maximum backoff for the persistent outbox's retry loop, and
/// the attempt budget before a stuck entry is given up on.
#[derive(Clone, Copy, Debug)]
pub struct RetryBackoff {
    /// Delay before the first retry of a failed send.
    pub initial: Duration,
    /// Ceiling the exponential backoff never exceeds.
    pub cap: Duration,
    /// Number of retry attempts a single entry may accumulate before the
    /// outbox dead-letters it with `TransportFatal` instead of retrying
    /// again.
    pub max_attempts: u32,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

struct OutboxEntry {
    envelope: Envelope,
    attempts: u32,
    not_before: Instant,
}

/// Outcome of one drain pass over the persistent outbox.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Envelopes the remote durably accepted this pass.
    pub delivered: Vec<Reference>,
    /// Envelopes removed from the outbox that will never be retried: either
    /// the remote rejected them outright (a 403 is not retried, per the
    /// fork's contract), or they exhausted their `RetryBackoff::max_attempts`
    /// budget.
    pub dead_lettered: Vec<(Reference, ForkError)>,
}

/// Splits the write path between local storage and a remote collaborator.
pub struct Fork {
    storage: Arc<dyn Storage>,
    remote: Arc<dyn RemoteStore>,
    authenticator: Arc<dyn Authenticator>,
    mode: ForkMode,
    backoff: RetryBackoff,
    outbox: Mutex<VecDeque<OutboxEntry>>,
}

impl Fork {
    /// Builds a fork over `storage`, delivering through `remote` according to `mode`.
    pub fn new(
        storage: Arc<dyn Storage>,
        remote: Arc<dyn RemoteStore>,
        authenticator: Arc<dyn Authenticator>,
        mode: ForkMode,
        backoff: RetryBackoff,
    ) -> Self {
        Self {
            storage,
            remote,
            authenticator,
            mode,
            backoff,
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of envelopes currently waiting in the persistent outbox.
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Saves `envelopes` locally, then applies this fork's mode to deliver
    /// them remotely.
    pub async fn save(&self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, ForkError> {
        let saved = self.storage.save(envelopes).await?;
        if saved.is_empty() {
            return Ok(saved);
        }
        match self.mode {
            ForkMode::PassThrough => {}
            ForkMode::Transient => {
                self.send_with_reauth(saved.clone()).await?;
            }
            ForkMode::Persistent => {
                let mut outbox = self.outbox.lock();
                for envelope in &saved {
                    outbox.push_back(OutboxEntry {
                        envelope: envelope.clone(),
                        attempts: 0,
                        not_before: Instant::now(),
                    });
                }
            }
        }
        Ok(saved)
    }

    async fn send_with_reauth(&self, envelopes: Vec<Envelope>) -> Result<(), ForkError> {
        match self.remote.save(envelopes.clone()).await? {
            OutboundOutcome::Accepted => Ok(()),
            OutboundOutcome::Forbidden => Err(ForkError::Forbidden {
                fact_type: envelopes
                    .first()
                    .map(|e| e.fact.fact_type.clone())
                    .unwrap_or_default(),
            }),
            OutboundOutcome::ReauthRequired => {
                self.authenticator.reauthenticate().await?;
                match self.remote.save(envelopes).await? {
                    OutboundOutcome::Accepted => Ok(()),
                    _ => Err(ForkError::ReauthRequired),
                }
            }
            OutboundOutcome::Retryable => Err(ForkError::TransportRetryable(
                "remote temporarily unavailable".to_owned(),
            )),
            OutboundOutcome::Fatal(reason) => Err(ForkError::TransportFatal(reason)),
        }
    }

    /// Attempts to deliver every outbox entry whose backoff has elapsed.
    /// Entries the remote accepts or forbids are removed; entries the
    /// remote could not currently accept are left in place with their
    /// backoff advanced. Idempotent: envelopes are content-addressed, so a
    /// concurrent or duplicate drain cannot corrupt remote state.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> DrainReport {
        let now = Instant::now();
        let due: Vec<(usize, Envelope)> = {
            let outbox = self.outbox.lock();
            outbox
                .iter()
                .enumerate()
                .filter(|(_, e)| e.not_before <= now)
                .map(|(i, e)| (i, e.envelope.clone()))
                .collect()
        };

        let mut report = DrainReport::default();
        let mut to_remove = Vec::new();
        for (index, envelope) in due {
            let reference = match envelope.reference() {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(error = %err, "outbox entry has an unreferenceable fact");
                    to_remove.push(index);
                    continue;
                }
            };
            match self.remote.save(vec![envelope]).await {
                Ok(OutboundOutcome::Accepted) => {
                    report.delivered.push(reference);
                    to_remove.push(index);
                }
                Ok(OutboundOutcome::Forbidden) => {
                    report.dead_lettered.push((
                        reference.clone(),
                        ForkError::Forbidden {
                            fact_type: reference.fact_type.clone(),
                        },
                    ));
                    to_remove.push(index);
                }
                Ok(OutboundOutcome::Fatal(reason)) => {
                    report
                        .dead_lettered
                        .push((reference, ForkError::TransportFatal(reason)));
                    to_remove.push(index);
                }
                Ok(OutboundOutcome::ReauthRequired) => {
                    // retried on the next drain pass, with fresh credentials if
                    // reauthentication succeeded.
                    let _ = self.authenticator.reauthenticate().await;
                    if let Some(err) = self.bump_or_exhaust(index) {
                        report.dead_lettered.push((reference, err));
                        to_remove.push(index);
                    }
                }
                Ok(OutboundOutcome::Retryable) | Err(_) => {
                    if let Some(err) = self.bump_or_exhaust(index) {
                        report.dead_lettered.push((reference, err));
                        to_remove.push(index);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut outbox = self.outbox.lock();
            for index in to_remove.into_iter().rev() {
                outbox.remove(index);
            }
        }
        report
    }

    /// Advances `index`'s attempt count and backoff. Once the entry has
    /// accumulated more attempts than `RetryBackoff::max_attempts`, it is not
    /// rescheduled; instead a `TransportFatal` is returned for the caller to
    /// dead-letter.
    fn bump_or_exhaust(&self, index: usize) -> Option<ForkError> {
        let mut outbox = self.outbox.lock();
        let entry = outbox.get_mut(index)?;
        entry.attempts += 1;
        if entry.attempts > self.backoff.max_attempts {
            return Some(ForkError::TransportFatal(format!(
                "outbox entry exceeded retry budget of {} attempts",
                self.backoff.max_attempts
            )));
        }
        let delay = self
            .backoff
            .initial
            .saturating_mul(1u32 << entry.attempts.min(16))
            .min(self.backoff.cap);
        entry.not_before = Instant::now() + delay;
        None
    }
}
