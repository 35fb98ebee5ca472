//! Entity lifecycle
//!
//! Life only ever advances: Alive → Dying → Dead. A removed entity has no
//! Life at all; its document is gone from the store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a persisted entity
///
/// Ordering follows the lifecycle, so `a <= b` means `b` is the same state or
/// further along. Serialized lowercase (`"alive"`, `"dying"`, `"dead"`), which
/// is also the form used in field assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    /// Entity is in service
    Alive,
    /// Removal requested; waiting for dependents to detach
    Dying,
    /// Entity is out of service and awaiting removal
    Dead,
}

impl Life {
    /// Name used in documents and assertions
    pub fn as_str(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }

    /// Whether `next` is a legal successor of this state (including staying put)
    pub fn can_advance_to(&self, next: Life) -> bool {
        next >= *self
    }

    /// JSON form used in documents and assertions
    pub fn to_value(self) -> serde_json::Value {
        serde_json::Value::String(self.as_str().to_string())
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Life> for serde_json::Value {
    fn from(life: Life) -> Self {
        life.to_value()
    }
}
