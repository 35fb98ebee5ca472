//! Concurrency layer for fleetstate
//!
//! This crate implements the optimistic transaction executor:
//! - TxnRunner: builds, submits and retries conditional operation sets
//! - RetryConfig: attempt budget and backoff
//! - Build / TxnOutcome: explicit three-way results (commit, no-op, conflict)
//! - Refresh: snapshot re-read between attempts
//!
//! Conflicts never escape as values. They are retried until the budget is
//! spent, at which point `RetryBudgetExceeded` is returned.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod metrics;
pub mod outcome;
pub mod retry;
pub mod runner;

pub use metrics::{RunnerMetrics, RunnerStats};
pub use outcome::{Build, TxnOutcome};
pub use retry::RetryConfig;
pub use runner::{Refresh, TxnRunner};
