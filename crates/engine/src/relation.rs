//! Relations between application endpoints
//!
//! A relation is Alive until destroyed. Destroying a relation with units in
//! scope only marks it Dying; the last unit to leave scope removes it. A
//! relation with no units in scope is removed immediately, releasing the
//! reference it holds on each of its applications and queueing its settings
//! documents for deferred cleanup.

use std::fmt;

use fleetstate_concurrency::Refresh;
use fleetstate_core::{
    fields, Assert, Collection, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};
use tracing::debug;

use crate::cleanup::{cleanup_op, CleanupKind};
use crate::lifecycle::DestroyPlan;
use crate::records::{unit_application, Endpoint, RelationDoc, RelationScope, Role};
use crate::refcount::Departure;
use crate::relation_unit::RelationUnit;
use crate::state::State;
use crate::unit::Unit;

/// Key describing the relation defined by `endpoints`
///
/// Endpoints are sorted by application name, then endpoint name, and rendered
/// `app:endpoint` joined by a space.
pub fn relation_key(endpoints: &[Endpoint]) -> String {
    let mut sorted: Vec<&Endpoint> = endpoints.iter().collect();
    sorted.sort_by(|a, b| {
        a.application_name
            .cmp(&b.application_name)
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted
        .iter()
        .map(|ep| ep.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Snapshot of a relation
#[derive(Debug, Clone)]
pub struct Relation {
    st: State,
    doc: RelationDoc,
}

impl Relation {
    pub(crate) fn new(st: State, doc: RelationDoc) -> Self {
        Relation { st, doc }
    }

    /// Relation key
    pub fn key(&self) -> &str {
        &self.doc.key
    }

    /// Incarnation id
    pub fn id(&self) -> i64 {
        self.doc.id
    }

    /// Life as of the last refresh
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Units in scope as of the last refresh
    pub fn unit_count(&self) -> i64 {
        self.doc.unit_count
    }

    /// Endpoints
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.doc.endpoints
    }

    pub(crate) fn doc_id(&self) -> String {
        self.st.doc_id(&self.doc.key)
    }

    /// Assertion that the stored relation is this incarnation
    pub(crate) fn incarnation(&self) -> Assert {
        Assert::field_eq(fields::RELATION_ID, self.doc.id)
    }

    pub(crate) fn state(&self) -> &State {
        &self.st
    }

    fn entity(&self) -> String {
        format!("relation {:?}", self.doc.key)
    }

    /// The endpoint of the named application
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the application is not a member.
    pub fn endpoint(&self, application: &str) -> FleetResult<Endpoint> {
        self.doc
            .endpoints
            .iter()
            .find(|ep| ep.application_name == application)
            .cloned()
            .ok_or_else(|| {
                FleetError::invalid_input(format!(
                    "application {application:?} is not a member of {:?}",
                    self.doc.key
                ))
            })
    }

    /// Endpoints that units of the named application relate to
    pub fn related_endpoints(&self, application: &str) -> FleetResult<Vec<Endpoint>> {
        let role = self.endpoint(application)?.role.counterpart();
        let related: Vec<Endpoint> = self
            .doc
            .endpoints
            .iter()
            .filter(|ep| ep.role == role)
            .cloned()
            .collect();
        if related.is_empty() {
            return Err(FleetError::invalid_input(format!(
                "no endpoints of {:?} relate to application {application:?}",
                self.doc.key
            )));
        }
        Ok(related)
    }

    /// Whether this is a peer relation with a single endpoint
    pub fn is_solitary_peer(&self) -> bool {
        self.doc.endpoints.len() == 1 && self.doc.endpoints[0].role == Role::Peer
    }

    /// Ensure the relation will be removed at some point
    ///
    /// With no units in scope it is removed immediately; otherwise it is marked
    /// Dying and the last unit to leave scope removes it. Destroying a relation
    /// that is already Dying, or already removed, succeeds without change.
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` for a peer relation, which cannot exist without
    ///   its application
    /// - `RetryBudgetExceeded` under sustained contention
    pub fn destroy(&mut self) -> FleetResult<()> {
        let context = format!("cannot destroy relation {:?}", self.doc.key);
        if self.is_solitary_peer() {
            return Err(FleetError::invariant(self.entity(), "is a peer relation").annotate(context));
        }

        let mut rel = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut rel, |rel, _| Ok(rel.destroy_ops(None)?.into_build()))
            .annotate(|| context)?;
        debug!(target: "fleet::lifecycle", relation = %self.doc.key, ?outcome, "relation destroyed");

        // The document may in fact be gone; callers only learn that by refreshing.
        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// Operations destroying the relation
    ///
    /// If `ignore` names an application, no operations touching that
    /// application are generated; the caller is destroying it and accounts
    /// for the released reference itself.
    pub(crate) fn destroy_ops(&self, ignore: Option<&str>) -> FleetResult<DestroyPlan> {
        if self.doc.life != Life::Alive {
            return Ok(DestroyPlan::AlreadyDying);
        }
        if self.doc.unit_count == 0 {
            return Ok(DestroyPlan::Remove(self.remove_ops(ignore, None)?));
        }
        Ok(DestroyPlan::MarkDying(vec![Op::update(
            Collection::Relations,
            self.doc_id(),
            vec![Mutation::set(fields::LIFE, Life::Dying)],
        )
        .with_assert(
            self.incarnation()
                .and(Assert::is_alive())
                .and(Assert::gt(fields::UNIT_COUNT, 0)),
        )]))
    }

    /// Operations removing the relation
    ///
    /// `departing` names the unit whose departure from scope removes the
    /// relation; in that case the relation must be Dying with exactly that
    /// unit left in scope, and its applications may be Dying and otherwise
    /// unreferenced, requiring removal themselves.
    pub(crate) fn remove_ops(
        &self,
        ignore: Option<&str>,
        departing: Option<&str>,
    ) -> FleetResult<Vec<Op>> {
        let (own, departure) = match departing {
            Some(unit) => (
                Assert::life(Life::Dying).and(Assert::field_eq(fields::UNIT_COUNT, 1)),
                Departure::UnitLeaving(unit),
            ),
            None => (
                Assert::is_alive().and(Assert::field_eq(fields::UNIT_COUNT, 0)),
                Departure::Destroying,
            ),
        };
        let mut ops = vec![
            Op::remove(Collection::Relations, self.doc_id()).with_assert(self.incarnation().and(own))
        ];
        for ep in &self.doc.endpoints {
            if Some(ep.application_name.as_str()) == ignore {
                continue;
            }
            let refcount = self.st.refcount_for(ep.source);
            ops.extend(refcount.release_ops(&self.st, &ep.application_name, departure)?);
        }
        ops.push(cleanup_op(
            &self.st,
            CleanupKind::RelationSettings,
            &format!("{}#", self.global_scope()),
        ));
        Ok(ops)
    }

    /// RelationUnit for a unit of one of this relation's local applications
    pub fn unit(&self, unit: &Unit) -> FleetResult<RelationUnit> {
        self.relation_unit(unit.name(), unit.principal(), true)
    }

    /// RelationUnit for a unit of one of this relation's remote applications
    ///
    /// Remote units are not persisted here, so their life is not checked.
    pub fn remote_unit(&self, unit_name: &str) -> FleetResult<RelationUnit> {
        let application = unit_application(unit_name)
            .ok_or_else(|| FleetError::invalid_input(format!("invalid unit name {unit_name:?}")))?;
        self.st.remote_application(application)?;
        self.relation_unit(unit_name, None, false)
    }

    fn relation_unit(
        &self,
        unit_name: &str,
        principal: Option<&str>,
        check_unit_life: bool,
    ) -> FleetResult<RelationUnit> {
        let application = unit_application(unit_name)
            .ok_or_else(|| FleetError::invalid_input(format!("invalid unit name {unit_name:?}")))?;
        let endpoint = self.endpoint(application)?;
        let scope = match endpoint.scope {
            RelationScope::Global => self.global_scope(),
            RelationScope::Container => {
                let container = principal.unwrap_or(unit_name);
                format!("{}#{}", self.global_scope(), container)
            }
        };
        Ok(RelationUnit::new(
            self.clone(),
            unit_name.to_string(),
            endpoint,
            scope,
            check_unit_life,
        ))
    }

    /// Scope prefix shared by every scope and settings document of this relation
    fn global_scope(&self) -> String {
        format!("r#{}", self.doc.id)
    }
}

impl Refresh for Relation {
    /// Re-read the relation
    ///
    /// A relation removed and re-added under the same key is a different
    /// relation; it is reported as `NotFound` so lifecycle never appears to
    /// go backwards.
    fn refresh(&mut self) -> FleetResult<()> {
        let doc: Option<RelationDoc> = self
            .st
            .read(Collection::Relations, &self.doc_id())
            .annotate(|| format!("cannot refresh relation {:?}", self.doc.key))?;
        match doc {
            Some(doc) if doc.id == self.doc.id => {
                self.doc = doc;
                Ok(())
            }
            _ => Err(FleetError::not_found(self.entity())),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc.key)
    }
}
