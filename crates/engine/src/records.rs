//! Persisted record types
//!
//! Each entity kind has one record struct that round-trips through a
//! [`Document`](fleetstate_core::Document). Field names match the constants in
//! [`fleetstate_core::fields`], so assertions built from those constants
//! address the same fields serde writes.

use chrono::{DateTime, Utc};
use fleetstate_core::Life;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role an endpoint plays in a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Offers an interface
    Provider,
    /// Consumes an interface
    Requirer,
    /// Relates to other units of the same application
    Peer,
}

impl Role {
    /// The role an endpoint of this role relates to
    pub fn counterpart(self) -> Role {
        match self {
            Role::Provider => Role::Requirer,
            Role::Requirer => Role::Provider,
            Role::Peer => Role::Peer,
        }
    }

    /// Name used in scope keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Provider => "provider",
            Role::Requirer => "requirer",
            Role::Peer => "peer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which units of the related applications see each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationScope {
    /// Every unit relates to every counterpart unit
    #[default]
    Global,
    /// Units relate only within one container (principal plus subordinates)
    Container,
}

/// Where the application behind an endpoint lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationSource {
    /// An application of this model (`applications` collection)
    #[default]
    Local,
    /// An application offered from another model (`remoteapplications`)
    Remote,
}

/// One side of a relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Application name
    pub application_name: String,
    /// Endpoint name within the application
    pub name: String,
    /// Role
    pub role: Role,
    /// Interface both sides must share
    pub interface: String,
    /// Scope
    #[serde(default)]
    pub scope: RelationScope,
    /// Local or remote application
    #[serde(default)]
    pub source: ApplicationSource,
}

impl Endpoint {
    /// A globally scoped endpoint of a local application
    pub fn new(
        application_name: impl Into<String>,
        name: impl Into<String>,
        role: Role,
        interface: impl Into<String>,
    ) -> Self {
        Endpoint {
            application_name: application_name.into(),
            name: name.into(),
            role,
            interface: interface.into(),
            scope: RelationScope::Global,
            source: ApplicationSource::Local,
        }
    }

    /// Shorthand for a provider endpoint
    pub fn provider(app: &str, name: &str, interface: &str) -> Self {
        Endpoint::new(app, name, Role::Provider, interface)
    }

    /// Shorthand for a requirer endpoint
    pub fn requirer(app: &str, name: &str, interface: &str) -> Self {
        Endpoint::new(app, name, Role::Requirer, interface)
    }

    /// Shorthand for a peer endpoint
    pub fn peer(app: &str, name: &str, interface: &str) -> Self {
        Endpoint::new(app, name, Role::Peer, interface)
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: RelationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Mark the application as remote
    pub fn remote(mut self) -> Self {
        self.source = ApplicationSource::Remote;
        self
    }

    /// Whether this endpoint can be related to `other`
    pub fn can_relate_to(&self, other: &Endpoint) -> bool {
        self.application_name != other.application_name
            && self.interface == other.interface
            && self.role != Role::Peer
            && self.role.counterpart() == other.role
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.application_name, self.name)
    }
}

/// Persisted relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDoc {
    /// Relation key (`relation_key` of the endpoints)
    pub key: String,
    /// Owning model
    pub model_uuid: String,
    /// Incarnation id, unique for the lifetime of the model
    pub id: i64,
    /// One peer endpoint, or a provider and a requirer
    pub endpoints: Vec<Endpoint>,
    /// Lifecycle state
    pub life: Life,
    /// Units currently in scope
    pub unit_count: i64,
}

/// Persisted local application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDoc {
    /// Application name
    pub name: String,
    /// Owning model
    pub model_uuid: String,
    /// Lifecycle state
    pub life: Life,
    /// Units belonging to the application
    pub unit_count: i64,
    /// Relations the application takes part in
    pub relation_count: i64,
}

/// Persisted remote application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApplicationDoc {
    /// Application name (unique across local and remote applications)
    pub name: String,
    /// Owning model
    pub model_uuid: String,
    /// Model the application is offered from
    pub source_model: String,
    /// Lifecycle state
    pub life: Life,
    /// Relations the application takes part in
    pub relation_count: i64,
}

/// Persisted unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDoc {
    /// Unit name, `<application>/<n>`
    pub name: String,
    /// Application name
    pub application: String,
    /// Owning model
    pub model_uuid: String,
    /// Lifecycle state
    pub life: Life,
    /// Principal unit, for subordinates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// Persisted machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDoc {
    /// Machine id
    pub machine_id: String,
    /// Owning model
    pub model_uuid: String,
    /// Lifecycle state
    pub life: Life,
    /// Operating system series
    pub series: String,
}

/// Marker that a unit is in a relation scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationScopeDoc {
    /// Scope key, `r#<id>[#<container>]#<role>#<unit>`
    pub key: String,
    /// Unit name
    pub unit: String,
}

/// Progress of one unit through a series upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeSeriesStatus {
    /// Nothing done yet
    NotStarted,
    /// Preparation running
    PrepareStarted,
    /// Preparation finished
    PrepareCompleted,
    /// Completion running
    CompleteStarted,
    /// Upgrade finished
    Completed,
    /// Upgrade failed
    Error,
}

impl UpgradeSeriesStatus {
    /// JSON form used in documents and assertions
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeSeriesStatus::NotStarted => "not-started",
            UpgradeSeriesStatus::PrepareStarted => "prepare-started",
            UpgradeSeriesStatus::PrepareCompleted => "prepare-completed",
            UpgradeSeriesStatus::CompleteStarted => "complete-started",
            UpgradeSeriesStatus::Completed => "completed",
            UpgradeSeriesStatus::Error => "error",
        }
    }
}

impl From<UpgradeSeriesStatus> for serde_json::Value {
    fn from(status: UpgradeSeriesStatus) -> Self {
        serde_json::Value::String(status.as_str().to_string())
    }
}

/// One unit's entry in an upgrade-series lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitUpgradeStatus {
    /// Unit name
    pub id: String,
    /// Current status
    pub status: UpgradeSeriesStatus,
    /// When the status last changed
    pub timestamp: DateTime<Utc>,
}

/// Per-machine lock held while the machine's series is upgraded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSeriesLock {
    /// Machine id
    pub machine_id: String,
    /// Series being upgraded from
    pub from_series: String,
    /// Series being upgraded to
    pub to_series: String,
    /// Units and their preparation status
    pub prepare_units: Vec<UnitUpgradeStatus>,
    /// Units and their completion status
    #[serde(default)]
    pub complete_units: Vec<UnitUpgradeStatus>,
}

/// Integer sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDoc {
    /// Sequence name
    pub name: String,
    /// Owning model
    pub model_uuid: String,
    /// Next value to hand out
    pub counter: i64,
}

/// Application name of a unit name (`wordpress/3` → `wordpress`)
pub fn unit_application(unit_name: &str) -> Option<&str> {
    let (app, number) = unit_name.split_once('/')?;
    if app.is_empty() || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(app)
}
