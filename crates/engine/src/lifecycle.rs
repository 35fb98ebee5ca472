//! Shared destroy plumbing
//!
//! Every entity kind answers a destroy request with a [`DestroyPlan`] built
//! from its current snapshot. The plan is what the transaction runner submits;
//! an entity that is already on its way out produces no operations at all.

use fleetstate_concurrency::Build;
use fleetstate_core::{Assert, Collection, Life, Op};

use crate::relation::Relation;

/// Operations that carry out a destroy request
#[derive(Debug, Clone, PartialEq)]
pub enum DestroyPlan {
    /// The entity is already Dying (or Dead); nothing to do
    AlreadyDying,
    /// The entity still has referents; these ops mark it Dying
    MarkDying(Vec<Op>),
    /// The entity has no referents; these ops remove it and adjust neighbours
    Remove(Vec<Op>),
}

impl DestroyPlan {
    /// Whether the plan removes the entity
    pub fn is_remove(&self) -> bool {
        matches!(self, DestroyPlan::Remove(_))
    }

    /// Operations to submit (empty for `AlreadyDying`)
    pub fn ops(&self) -> &[Op] {
        match self {
            DestroyPlan::AlreadyDying => &[],
            DestroyPlan::MarkDying(ops) | DestroyPlan::Remove(ops) => ops,
        }
    }

    /// Convert into a runner build result
    pub fn into_build(self) -> Build {
        match self {
            DestroyPlan::AlreadyDying => Build::NoOpNeeded,
            DestroyPlan::MarkDying(ops) | DestroyPlan::Remove(ops) => Build::ops(ops),
        }
    }
}

/// Operations destroying every relation of an application being destroyed
///
/// Relations are destroyed with the application itself ignored, so their
/// removal does not touch the application's own relation count. Relations that
/// are already Dying are asserted to stay so. Returns the ops together with
/// the number of relations the ops remove.
pub(crate) fn destroy_relations(
    relations: &[Relation],
    application: &str,
) -> fleetstate_core::FleetResult<(Vec<Op>, i64)> {
    let mut ops = Vec::new();
    let mut removed = 0;
    for relation in relations {
        match relation.destroy_ops(Some(application))? {
            DestroyPlan::AlreadyDying => ops.push(Op::assert(
                Collection::Relations,
                relation.doc_id(),
                Assert::life(Life::Dying),
            )),
            DestroyPlan::MarkDying(relation_ops) => ops.extend(relation_ops),
            DestroyPlan::Remove(relation_ops) => {
                removed += 1;
                ops.extend(relation_ops);
            }
        }
    }
    Ok((ops, removed))
}
