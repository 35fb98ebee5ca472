//! Document store client contract
//!
//! The store is the only cross-caller synchronization point. Everything above
//! it works on snapshots read through `get`/`find` and commits through
//! `submit`, whose assertions reject stale operation sets.

use crate::document::Document;
use crate::error::{FleetError, FleetResult};
use crate::ops::{Op, Query};
use crate::types::Collection;

/// Details of the assertion that rejected an operation set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    /// Index of the failing op within the submitted set
    pub op_index: usize,
    /// Collection of the failing op
    pub collection: Collection,
    /// Document id of the failing op
    pub id: String,
    /// Rendered assertion
    pub reason: String,
}

impl From<ConflictInfo> for FleetError {
    fn from(info: ConflictInfo) -> Self {
        FleetError::Conflict {
            collection: info.collection.to_string(),
            id: info.id,
            reason: info.reason,
        }
    }
}

/// Result of submitting an operation set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Every assertion held and every action was applied
    Committed {
        /// Store revision produced by this commit
        revision: u64,
    },
    /// An assertion failed; nothing was applied
    Conflict(ConflictInfo),
}

impl SubmitOutcome {
    /// Whether the set was committed
    pub fn is_committed(&self) -> bool {
        matches!(self, SubmitOutcome::Committed { .. })
    }
}

/// Document store client
///
/// Thread safety: all methods must be safe to call concurrently from multiple
/// threads (requires Send + Sync).
pub trait DocumentStore: Send + Sync {
    /// Fetch one document
    ///
    /// # Errors
    ///
    /// Returns a `Store` error on connectivity or corruption failures.
    fn get(&self, collection: Collection, id: &str) -> FleetResult<Option<Document>>;

    /// Fetch every document of `collection` matching `query`, sorted by id
    ///
    /// # Errors
    ///
    /// Returns a `Store` error on connectivity or corruption failures.
    fn find(&self, collection: Collection, query: &Query) -> FleetResult<Vec<(String, Document)>>;

    /// Atomically apply an operation set if all of its assertions hold
    ///
    /// A failed assertion is reported as `Ok(SubmitOutcome::Conflict)`, never
    /// as an error.
    ///
    /// # Errors
    ///
    /// Returns a `Store` error on connectivity failures or malformed
    /// operations; the store is left unchanged.
    fn submit(&self, ops: &[Op]) -> FleetResult<SubmitOutcome>;

    /// Highest committed revision
    fn revision(&self) -> u64;
}
