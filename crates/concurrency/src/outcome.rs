//! Builder and runner results
//!
//! A builder answers each attempt with either an operation set or
//! [`Build::NoOpNeeded`]; the runner answers its caller with a
//! [`TxnOutcome`]. A conflict is never a value here: the runner consumes it
//! by retrying, and only exhaustion escapes (as `RetryBudgetExceeded`).

use fleetstate_core::Op;

/// What a builder produced for one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Build {
    /// Submit these operations
    Ops(Vec<Op>),
    /// The requested change has already happened (or is already in progress)
    NoOpNeeded,
}

impl Build {
    /// Wrap an operation set; an empty set means nothing to do
    pub fn ops(ops: Vec<Op>) -> Self {
        if ops.is_empty() {
            Build::NoOpNeeded
        } else {
            Build::Ops(ops)
        }
    }
}

impl From<Vec<Op>> for Build {
    fn from(ops: Vec<Op>) -> Self {
        Build::ops(ops)
    }
}

/// How a transaction run finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// An operation set was committed
    Committed {
        /// Attempts used, including the committing one
        attempts: usize,
        /// Store revision of the commit
        revision: u64,
    },
    /// The builder decided nothing needed doing
    NoOpNeeded {
        /// Attempts used
        attempts: usize,
    },
}

impl TxnOutcome {
    /// Whether an operation set was committed
    pub fn is_committed(&self) -> bool {
        matches!(self, TxnOutcome::Committed { .. })
    }

    /// Attempts used
    pub fn attempts(&self) -> usize {
        match self {
            TxnOutcome::Committed { attempts, .. } | TxnOutcome::NoOpNeeded { attempts } => {
                *attempts
            }
        }
    }
}
