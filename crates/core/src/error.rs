//! Error types for fleetstate
//!
//! This module defines the error taxonomy used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Taxonomy
//!
//! | Variant | Retried? | Surfaced to caller? |
//! |---------|----------|---------------------|
//! | `NotFound` | no | only where absence is not already success |
//! | `Conflict` | yes, by the transaction runner | never by `destroy` |
//! | `InvariantViolation` | no | always |
//! | `RetryBudgetExceeded` | no | always, distinct from domain errors |
//! | `Store` | no | always (fatal) |
//!
//! `Annotated` wraps any of the above with the entity and transition that was
//! being attempted. The kind predicates look through annotations, so callers can
//! match on `is_not_found()` without caring how many layers added context.

use thiserror::Error;

/// Result type alias for fleetstate operations
pub type FleetResult<T> = std::result::Result<T, FleetError>;

/// Error types for fleetstate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    /// Entity is absent (never existed, removed, or replaced by a new incarnation)
    #[error("{entity} not found")]
    NotFound {
        /// Human-readable entity description, e.g. `relation "wp:db mysql:server"`
        entity: String,
    },

    /// Optimistic precondition mismatch at commit time
    #[error("transaction conflict on {collection}/{id}: {reason}")]
    Conflict {
        /// Collection of the document whose assertion failed
        collection: String,
        /// Document id whose assertion failed
        id: String,
        /// Description of the failed assertion
        reason: String,
    },

    /// A structural rule forbids the requested transition
    #[error("{entity}: {reason}")]
    InvariantViolation {
        /// Entity the transition was requested on
        entity: String,
        /// Rule that was violated
        reason: String,
    },

    /// Every attempt in the retry budget hit a conflict
    #[error("transaction aborted after {attempts} attempts: state changing too quickly")]
    RetryBudgetExceeded {
        /// Number of attempts made
        attempts: usize,
    },

    /// Connectivity, corruption or malformed-operation failure in the store
    #[error("store error: {0}")]
    Store(String),

    /// Caller supplied an invalid argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity with the same identity already exists
    #[error("{entity} already exists")]
    AlreadyExists {
        /// Entity description
        entity: String,
    },

    /// Document could not be converted to or from its record type
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another error with context describing the attempted transition
    #[error("{context}: {source}")]
    Annotated {
        /// e.g. `cannot destroy relation "wp:db mysql:server"`
        context: String,
        /// Underlying error
        #[source]
        source: Box<FleetError>,
    },
}

impl FleetError {
    /// Create a NotFound error
    pub fn not_found(entity: impl Into<String>) -> Self {
        FleetError::NotFound {
            entity: entity.into(),
        }
    }

    /// Create an InvariantViolation error
    pub fn invariant(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::InvariantViolation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create a fatal store error
    pub fn store(message: impl Into<String>) -> Self {
        FleetError::Store(message.into())
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        FleetError::InvalidInput(message.into())
    }

    /// Wrap this error with context
    ///
    /// Annotating an already-annotated error nests the context, so the
    /// rendered message reads outermost first.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        FleetError::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost, un-annotated error
    pub fn root(&self) -> &FleetError {
        match self {
            FleetError::Annotated { source, .. } => source.root(),
            other => other,
        }
    }

    /// Entity is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), FleetError::NotFound { .. })
    }

    /// Optimistic precondition mismatch (transient)
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), FleetError::Conflict { .. })
    }

    /// Structural rule violation (never retried)
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self.root(), FleetError::InvariantViolation { .. })
    }

    /// Retry budget exhausted under contention
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self.root(), FleetError::RetryBudgetExceeded { .. })
    }

    /// Fatal store failure
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), FleetError::Store(_))
    }

    /// Entity already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), FleetError::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

/// Extension for attaching transition context to results
pub trait ResultExt<T> {
    /// Annotate the error (if any) with `context`
    fn annotate(self, context: impl FnOnce() -> String) -> FleetResult<T>;
}

impl<T> ResultExt<T> for FleetResult<T> {
    fn annotate(self, context: impl FnOnce() -> String) -> FleetResult<T> {
        self.map_err(|e| e.annotate(context()))
    }
}
