//! Optimistic transaction runner
//!
//! `TxnRunner` drives an operation builder against a [`DocumentStore`]:
//!
//! ```text
//! for attempt in 0..budget:
//!     build(attempt)         → Ops | NoOpNeeded | error
//!     submit(ops)            → Committed | Conflict | fatal error
//!     Conflict               → back off, next attempt
//! budget spent               → entity gone? NoOpNeeded : RetryBudgetExceeded
//! ```
//!
//! No locks are taken. A stale operation set is rejected by its own
//! assertions, and the builder gets another look at fresh state. Builders may
//! also return a `Conflict` error themselves when they observe state that is
//! mid-change; that is retried the same way.
//!
//! Every other error (fatal store failures, invariant violations, not-found)
//! is returned immediately without retrying.

use std::sync::Arc;

use fleetstate_core::{DocumentStore, FleetError, FleetResult, SubmitOutcome};
use tracing::{debug, trace, warn};

use crate::metrics::RunnerMetrics;
use crate::outcome::{Build, TxnOutcome};
use crate::retry::RetryConfig;

/// An entity snapshot that can re-read itself from the store
pub trait Refresh {
    /// Replace the snapshot with the current persisted state
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity is gone, or has been replaced by a
    /// different incarnation under the same identity.
    fn refresh(&mut self) -> FleetResult<()>;
}

/// Runs operation builders with optimistic retry
#[derive(Clone)]
pub struct TxnRunner {
    store: Arc<dyn DocumentStore>,
    config: RetryConfig,
    metrics: Arc<RunnerMetrics>,
}

impl std::fmt::Debug for TxnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnRunner")
            .field("config", &self.config)
            .field("stats", &self.metrics.stats())
            .finish()
    }
}

impl TxnRunner {
    /// Create a runner over `store`
    pub fn new(store: Arc<dyn DocumentStore>, config: RetryConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(RunnerMetrics::new()),
        }
    }

    /// The store this runner commits to
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Retry budget
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Shared counters
    pub fn metrics(&self) -> &RunnerMetrics {
        &self.metrics
    }

    /// Run `build` until its operation set commits, it reports nothing to do,
    /// it fails, or the retry budget is spent
    ///
    /// `build` receives the zero-based attempt number. An empty operation set
    /// counts as [`Build::NoOpNeeded`].
    ///
    /// # Errors
    ///
    /// - `RetryBudgetExceeded` if every attempt conflicted
    /// - any non-conflict error from `build` or `submit`, unchanged
    pub fn run<F>(&self, mut build: F) -> FleetResult<TxnOutcome>
    where
        F: FnMut(usize) -> FleetResult<Build>,
    {
        self.drive(&mut (), |_, attempt| build(attempt), |_| Ok(false))
    }

    /// Run `build` against an entity snapshot, refreshing it before every
    /// attempt after the first
    ///
    /// If a refresh finds the entity gone, the run finishes as
    /// [`TxnOutcome::NoOpNeeded`]: another committer already finished the job.
    /// That includes a final refresh after the last attempt conflicts, so a
    /// removed entity never surfaces as `RetryBudgetExceeded`.
    pub fn run_for<E, F>(&self, entity: &mut E, mut build: F) -> FleetResult<TxnOutcome>
    where
        E: Refresh,
        F: FnMut(&E, usize) -> FleetResult<Build>,
    {
        self.drive(
            entity,
            |entity, attempt| {
                if attempt > 0 && is_gone(entity)? {
                    return Ok(Build::NoOpNeeded);
                }
                build(&*entity, attempt)
            },
            |entity| is_gone(entity),
        )
    }

    /// The retry loop shared by `run` and `run_for`
    ///
    /// `gone` is asked once after the last attempt conflicts; `true` ends the
    /// run as a no-op instead of exhaustion.
    fn drive<S, F, G>(&self, state: &mut S, mut build: F, mut gone: G) -> FleetResult<TxnOutcome>
    where
        S: ?Sized,
        F: FnMut(&mut S, usize) -> FleetResult<Build>,
        G: FnMut(&mut S) -> FleetResult<bool>,
    {
        let budget = self.config.attempts();

        for attempt in 0..budget {
            self.metrics.record_attempt();

            let ops = match build(state, attempt) {
                Ok(Build::Ops(ops)) if !ops.is_empty() => ops,
                Ok(_) => {
                    self.metrics.record_no_op();
                    trace!(target: "fleet::txn", attempt, "no operations needed");
                    return Ok(TxnOutcome::NoOpNeeded {
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_conflict() => {
                    self.metrics.record_conflict();
                    debug!(target: "fleet::txn", attempt, error = %e, "builder saw transient state, retrying");
                    self.back_off(attempt, budget);
                    continue;
                }
                Err(e) => {
                    self.metrics.record_failure();
                    return Err(e);
                }
            };

            match self.store.submit(&ops) {
                Ok(SubmitOutcome::Committed { revision }) => {
                    self.metrics.record_commit();
                    debug!(target: "fleet::txn", attempt, revision, ops = ops.len(), "transaction committed");
                    return Ok(TxnOutcome::Committed {
                        attempts: attempt + 1,
                        revision,
                    });
                }
                Ok(SubmitOutcome::Conflict(info)) => {
                    self.metrics.record_conflict();
                    debug!(
                        target: "fleet::txn",
                        attempt,
                        collection = %info.collection,
                        id = %info.id,
                        assertion = %info.reason,
                        "assertion failed, retrying"
                    );
                    self.back_off(attempt, budget);
                }
                Err(e) => {
                    self.metrics.record_failure();
                    warn!(target: "fleet::txn", attempt, error = %e, "transaction failed");
                    return Err(e);
                }
            }
        }

        match gone(state) {
            Ok(true) => {
                self.metrics.record_no_op();
                debug!(target: "fleet::txn", attempts = budget, "entity gone after last conflict");
                return Ok(TxnOutcome::NoOpNeeded { attempts: budget });
            }
            Ok(false) => {}
            Err(e) => {
                self.metrics.record_failure();
                return Err(e);
            }
        }

        self.metrics.record_exhausted();
        warn!(target: "fleet::txn", attempts = budget, "retry budget exhausted");
        Err(FleetError::RetryBudgetExceeded { attempts: budget })
    }

    fn back_off(&self, attempt: usize, budget: usize) {
        if attempt + 1 < budget {
            let delay = self.config.calculate_delay(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

/// Refresh `entity`, reporting whether it no longer exists
fn is_gone<E: Refresh>(entity: &mut E) -> FleetResult<bool> {
    match entity.refresh() {
        Ok(()) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(e),
    }
}
