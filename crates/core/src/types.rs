//! Collection names, document keys and shared field names

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Relations between application endpoints
    Relations,
    /// One document per unit currently in a relation scope
    RelationScopes,
    /// Relation unit settings and application settings
    Settings,
    /// Local applications
    Applications,
    /// Applications offered from another model
    RemoteApplications,
    /// Units of applications
    Units,
    /// Machines
    Machines,
    /// Per-machine upgrade-series locks
    UpgradeSeriesLocks,
    /// Deferred cleanup records
    Cleanups,
    /// Integer sequences
    Sequences,
}

impl Collection {
    /// Every collection, in declaration order
    pub const ALL: [Collection; 10] = [
        Collection::Relations,
        Collection::RelationScopes,
        Collection::Settings,
        Collection::Applications,
        Collection::RemoteApplications,
        Collection::Units,
        Collection::Machines,
        Collection::UpgradeSeriesLocks,
        Collection::Cleanups,
        Collection::Sequences,
    ];

    /// Collection name
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Relations => "relations",
            Collection::RelationScopes => "relationscopes",
            Collection::Settings => "settings",
            Collection::Applications => "applications",
            Collection::RemoteApplications => "remoteapplications",
            Collection::Units => "units",
            Collection::Machines => "machines",
            Collection::UpgradeSeriesLocks => "upgradeserieslocks",
            Collection::Cleanups => "cleanups",
            Collection::Sequences => "sequences",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-qualified document key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocKey {
    /// Collection
    pub collection: Collection,
    /// Document id within the collection
    pub id: String,
}

impl DocKey {
    /// Create a key
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        DocKey {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Field names shared by entity records and the assertions built over them
pub mod fields {
    /// Lifecycle state
    pub const LIFE: &str = "life";
    /// Units in scope (relations) or units belonging (applications)
    pub const UNIT_COUNT: &str = "unit_count";
    /// Relations an application takes part in
    pub const RELATION_COUNT: &str = "relation_count";
    /// Incarnation id of a relation
    pub const RELATION_ID: &str = "id";
    /// Sequence counter
    pub const COUNTER: &str = "counter";
}
