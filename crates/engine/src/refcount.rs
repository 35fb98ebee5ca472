//! Endpoint refcount capability
//!
//! When a relation is removed, every application it names loses one
//! reference. How that reference is released depends on where the
//! application lives, so the relation delegates to an [`EndpointRefcount`]
//! chosen by the endpoint's [`ApplicationSource`](crate::records::ApplicationSource):
//!
//! | Collaborator | Collection | Counts considered |
//! |--------------|------------|-------------------|
//! | [`LocalApplications`] | `applications` | units and relations |
//! | [`RemoteApplications`] | `remoteapplications` | relations |
//!
//! Either way the release is one of two shapes:
//!
//! - the application is Dying and this was its last reference: its removal
//!   ops are inlined into the relation's transaction (one hop only; anything
//!   the application's removal would in turn release is left for later
//!   transactions)
//! - otherwise its relation count is decremented, guarded by `relation_count > 0`
//!   plus whatever assertion keeps the "not the last reference" decision valid
//!   at commit time

use fleetstate_core::{fields, Assert, Collection, FleetResult, Life, Op};

use crate::application::Application;
use crate::records::{unit_application, ApplicationDoc, RemoteApplicationDoc};
use crate::remote_application::RemoteApplication;
use crate::state::State;

/// Why a relation's references are being released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure<'a> {
    /// The relation (or one of its applications) is being destroyed; every
    /// application named by an Alive relation is itself Alive
    Destroying,
    /// The named unit is leaving the scope of a Dying relation, taking the
    /// relation's last unit reference with it
    UnitLeaving(&'a str),
}

/// Releases one relation reference held on an application
pub trait EndpointRefcount: Send + Sync {
    /// Collection holding the applications this collaborator manages
    fn collection(&self) -> Collection;

    /// If releasing this reference makes the application removable, the ops
    /// removing it
    fn last_reference_removal(
        &self,
        st: &State,
        application: &str,
        departure: Departure<'_>,
    ) -> FleetResult<Option<Vec<Op>>>;

    /// Ops decrementing the application's relation count
    fn decrement_ops(&self, st: &State, application: &str, departure: Departure<'_>) -> Vec<Op>;

    /// Ops releasing the reference: inline removal when eligible, else a
    /// guarded decrement
    fn release_ops(
        &self,
        st: &State,
        application: &str,
        departure: Departure<'_>,
    ) -> FleetResult<Vec<Op>> {
        match self.last_reference_removal(st, application, departure)? {
            Some(ops) => Ok(ops),
            None => Ok(self.decrement_ops(st, application, departure)),
        }
    }
}

/// Refcounts of applications in this model
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalApplications;

impl LocalApplications {
    /// Dying, no units, and the relation being removed is its only relation
    pub fn last_reference() -> Assert {
        Assert::life(Life::Dying)
            .and(Assert::field_eq(fields::UNIT_COUNT, 0))
            .and(Assert::field_eq(fields::RELATION_COUNT, 1))
    }
}

impl EndpointRefcount for LocalApplications {
    fn collection(&self) -> Collection {
        Collection::Applications
    }

    fn last_reference_removal(
        &self,
        st: &State,
        application: &str,
        departure: Departure<'_>,
    ) -> FleetResult<Option<Vec<Op>>> {
        let Departure::UnitLeaving(unit) = departure else {
            return Ok(None);
        };
        // The departing unit's own application still counts that unit.
        if unit_application(unit) == Some(application) {
            return Ok(None);
        }
        let id = st.doc_id(application);
        let last_ref = Self::last_reference();
        match st.store().get(Collection::Applications, &id)? {
            Some(doc) if last_ref.matches(Some(&doc)) => {
                let record: ApplicationDoc = doc.to_record()?;
                let ops = Application::new(st.clone(), record).remove_ops(last_ref);
                Ok(Some(ops))
            }
            _ => Ok(None),
        }
    }

    fn decrement_ops(&self, st: &State, application: &str, departure: Departure<'_>) -> Vec<Op> {
        let guard = match departure {
            Departure::Destroying => Assert::is_alive(),
            Departure::UnitLeaving(unit) if unit_application(unit) == Some(application) => {
                Assert::gt(fields::UNIT_COUNT, 0)
            }
            Departure::UnitLeaving(_) => Assert::Or(vec![
                Assert::is_alive(),
                Assert::gt(fields::UNIT_COUNT, 0),
                Assert::gt(fields::RELATION_COUNT, 1),
            ]),
        };
        vec![Op::decrement(
            Collection::Applications,
            st.doc_id(application),
            fields::RELATION_COUNT,
            Some(guard),
        )]
    }
}

/// Refcounts of applications offered from other models
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteApplications;

impl RemoteApplications {
    /// Dying and the relation being removed is its only relation
    pub fn last_reference() -> Assert {
        Assert::life(Life::Dying).and(Assert::field_eq(fields::RELATION_COUNT, 1))
    }
}

impl EndpointRefcount for RemoteApplications {
    fn collection(&self) -> Collection {
        Collection::RemoteApplications
    }

    fn last_reference_removal(
        &self,
        st: &State,
        application: &str,
        departure: Departure<'_>,
    ) -> FleetResult<Option<Vec<Op>>> {
        if departure == Departure::Destroying {
            return Ok(None);
        }
        let id = st.doc_id(application);
        let last_ref = Self::last_reference();
        match st.store().get(Collection::RemoteApplications, &id)? {
            Some(doc) if last_ref.matches(Some(&doc)) => {
                let record: RemoteApplicationDoc = doc.to_record()?;
                let ops = RemoteApplication::new(st.clone(), record).remove_ops(last_ref);
                Ok(Some(ops))
            }
            _ => Ok(None),
        }
    }

    fn decrement_ops(&self, st: &State, application: &str, departure: Departure<'_>) -> Vec<Op> {
        let guard = match departure {
            Departure::Destroying => Assert::is_alive(),
            Departure::UnitLeaving(_) => Assert::Or(vec![
                Assert::is_alive(),
                Assert::gt(fields::RELATION_COUNT, 1),
            ]),
        };
        vec![Op::decrement(
            Collection::RemoteApplications,
            st.doc_id(application),
            fields::RELATION_COUNT,
            Some(guard),
        )]
    }
}
