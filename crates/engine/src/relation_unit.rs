//! Units entering and leaving relation scopes
//!
//! A relation's `unit_count` is the number of units currently in its scope.
//! Entering increments it, leaving decrements it, and the unit whose departure
//! takes the count of a Dying relation to zero removes the relation in the
//! same transaction.

use serde_json::{Map, Value};
use tracing::debug;

use fleetstate_concurrency::{Build, Refresh};
use fleetstate_core::{
    fields, Assert, Collection, Document, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};

use crate::records::{Endpoint, RelationScopeDoc, UnitDoc};
use crate::relation::Relation;

const SETTINGS_FIELD: &str = "settings";

/// A unit's membership in one relation
#[derive(Debug, Clone)]
pub struct RelationUnit {
    relation: Relation,
    unit_name: String,
    endpoint: Endpoint,
    scope: String,
    check_unit_life: bool,
}

impl RelationUnit {
    pub(crate) fn new(
        relation: Relation,
        unit_name: String,
        endpoint: Endpoint,
        scope: String,
        check_unit_life: bool,
    ) -> Self {
        RelationUnit {
            relation,
            unit_name,
            endpoint,
            scope,
            check_unit_life,
        }
    }

    /// The relation
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    /// The unit's endpoint in the relation
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Unit name
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Scope document key, also used for the unit's relation settings
    pub fn key(&self) -> String {
        format!("{}#{}#{}", self.scope, self.endpoint.role, self.unit_name)
    }

    fn doc_id(&self) -> String {
        self.relation.state().doc_id(&self.key())
    }

    /// Whether the unit is in scope
    pub fn in_scope(&self) -> FleetResult<bool> {
        let st = self.relation.state();
        Ok(st.store().get(Collection::RelationScopes, &self.doc_id())?.is_some())
    }

    /// The unit's settings in this relation
    ///
    /// Settings outlive scope membership until the relation's settings are
    /// cleaned up.
    pub fn settings(&self) -> FleetResult<Map<String, Value>> {
        let st = self.relation.state();
        let doc = st
            .store()
            .get(Collection::Settings, &self.doc_id())?
            .ok_or_else(|| FleetError::not_found(format!("settings for {:?}", self.key())))?;
        match doc.get(SETTINGS_FIELD) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(Map::new()),
        }
    }

    /// Enter the relation's scope with the given settings
    ///
    /// Entering when already in scope succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the relation or the unit is no longer
    /// Alive.
    pub fn enter_scope(&self, settings: Map<String, Value>) -> FleetResult<()> {
        let st = self.relation.state().clone();
        let key = self.key();
        let scope_id = self.doc_id();
        let context = format!(
            "cannot enter scope for unit {:?} in relation {:?}",
            self.unit_name,
            self.relation.key()
        );
        let not_alive = |what: String| FleetError::invariant(what, "is no longer alive");

        let mut relation = self.relation.clone();
        let outcome = st
            .runner()
            .run(|attempt| {
                if st.store().get(Collection::RelationScopes, &scope_id)?.is_some() {
                    return Ok(Build::NoOpNeeded);
                }
                if attempt > 0 {
                    match relation.refresh() {
                        Err(e) if e.is_not_found() => {
                            return Err(not_alive(format!("relation {:?}", relation.key())))
                        }
                        other => other?,
                    }
                }
                if relation.life() != Life::Alive {
                    return Err(not_alive(format!("relation {:?}", relation.key())));
                }

                let mut ops = vec![Op::update(
                    Collection::Relations,
                    relation.doc_id(),
                    vec![Mutation::inc(fields::UNIT_COUNT, 1)],
                )
                .with_assert(relation.incarnation().and(Assert::is_alive()))];

                if self.check_unit_life {
                    let unit_id = st.doc_id(&self.unit_name);
                    match st.read::<UnitDoc>(Collection::Units, &unit_id)? {
                        Some(unit) if unit.life == Life::Alive => {
                            ops.push(Op::assert(Collection::Units, unit_id, Assert::is_alive()))
                        }
                        _ => return Err(not_alive(format!("unit {:?}", self.unit_name))),
                    }
                }

                let scope = Document::from_record(&RelationScopeDoc {
                    key: key.clone(),
                    unit: self.unit_name.clone(),
                })?;
                ops.push(Op::insert(Collection::RelationScopes, &scope_id, scope));

                // Settings left behind by an earlier membership are replaced.
                let value = Value::Object(settings.clone());
                if st.store().get(Collection::Settings, &scope_id)?.is_some() {
                    ops.push(Op::update(
                        Collection::Settings,
                        &scope_id,
                        vec![Mutation::set(SETTINGS_FIELD, value)],
                    ));
                } else {
                    let doc = Document::new().with(SETTINGS_FIELD, value);
                    ops.push(Op::insert(Collection::Settings, &scope_id, doc));
                }
                Ok(Build::ops(ops))
            })
            .annotate(|| context)?;

        debug!(target: "fleet::lifecycle", unit = %self.unit_name, scope = %key, ?outcome, "entered scope");
        Ok(())
    }

    /// Leave the relation's scope
    ///
    /// If the relation is Dying and this is the last unit in scope, the
    /// relation is removed. Leaving when not in scope succeeds without change.
    /// The unit's settings are left for the relation's settings cleanup.
    pub fn leave_scope(&self) -> FleetResult<()> {
        let st = self.relation.state().clone();
        let scope_id = self.doc_id();
        let context = format!(
            "cannot leave scope for unit {:?} in relation {:?}",
            self.unit_name,
            self.relation.key()
        );

        let mut relation = self.relation.clone();
        let outcome = st
            .runner()
            .run(|attempt| {
                // A snapshot taken before this unit entered undercounts.
                if attempt > 0 || relation.unit_count() < 1 {
                    match relation.refresh() {
                        Err(e) if e.is_not_found() => return Ok(Build::NoOpNeeded),
                        other => other?,
                    }
                }
                if st.store().get(Collection::RelationScopes, &scope_id)?.is_none() {
                    return Ok(Build::NoOpNeeded);
                }

                let mut ops = vec![Op::remove(Collection::RelationScopes, &scope_id)];
                let count = relation.unit_count();
                if count < 1 {
                    return Err(FleetError::store(format!(
                        "relation {:?} has no units in scope",
                        relation.key()
                    )));
                }
                if count == 1 && relation.life() == Life::Dying {
                    ops.extend(relation.remove_ops(None, Some(&self.unit_name))?);
                } else {
                    let others_remain = match relation.life() {
                        Life::Alive => Assert::is_alive(),
                        life => Assert::life(life).and(Assert::gt(fields::UNIT_COUNT, 1)),
                    };
                    let others_remain = relation.incarnation().and(others_remain);
                    ops.push(Op::decrement(
                        Collection::Relations,
                        relation.doc_id(),
                        fields::UNIT_COUNT,
                        Some(others_remain),
                    ));
                }
                Ok(Build::ops(ops))
            })
            .annotate(|| context)?;

        debug!(target: "fleet::lifecycle", unit = %self.unit_name, relation = %self.relation.key(), ?outcome, "left scope");
        Ok(())
    }
}
