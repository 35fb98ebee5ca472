//! Lifecycle Property Tests
//!
//! Random sequences of topology changes against one model. After every step:
//! - stored counts match the documents they count
//! - no entity's life goes backwards, and removed entities stay removed
//! - only expected refusals surface (never retry exhaustion or store failures)
//! - every decrement the engine submits is guarded to stay non-negative
//!
//! A full teardown afterwards must leave nothing behind but sequences.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use crate::common::*;
use fleetstate::{Document, Op, SubmitOutcome, Unit};

// ============================================================================
// Guarded store - records decrements that could go negative
// ============================================================================

struct GuardedStore {
    inner: Arc<MemoryStore>,
    unguarded: Mutex<Vec<String>>,
}

impl DocumentStore for GuardedStore {
    fn get(&self, collection: Collection, id: &str) -> FleetResult<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn find(&self, collection: Collection, query: &Query) -> FleetResult<Vec<(String, Document)>> {
        self.inner.find(collection, query)
    }

    fn submit(&self, ops: &[Op]) -> FleetResult<SubmitOutcome> {
        for op in ops {
            for (field, delta) in op.decrements() {
                let guarded = op
                    .assert
                    .as_ref()
                    .map_or(false, |a| a.guarantees_gt(field, -delta - 1));
                if !guarded {
                    self.unguarded
                        .lock()
                        .push(format!("{} {} {field} {delta}", op.collection, op.id));
                }
            }
        }
        self.inner.submit(ops)
    }

    fn revision(&self) -> u64 {
        self.inner.revision()
    }
}

fn guarded_model() -> (TestModel, Arc<GuardedStore>) {
    init_tracing();
    let inner = Arc::new(MemoryStore::new());
    let guarded = Arc::new(GuardedStore {
        inner: Arc::clone(&inner),
        unguarded: Mutex::new(Vec::new()),
    });
    let st = State::new(Arc::clone(&guarded) as Arc<dyn DocumentStore>);
    (TestModel { st, store: inner }, guarded)
}

// ============================================================================
// Actions
// ============================================================================

const APPS: [&str; 3] = ["wordpress", "mysql", "memcached"];

fn pair_endpoints(pair: usize) -> [Endpoint; 2] {
    match pair % 2 {
        0 => db_endpoints("wordpress", "mysql"),
        _ => [
            Endpoint::requirer("wordpress", "cache", "memcache"),
            Endpoint::provider("memcached", "cache", "memcache"),
        ],
    }
}

#[derive(Debug, Clone)]
enum Action {
    AddUnit(usize),
    AddRelation(usize),
    EnterScope(usize, usize),
    LeaveScope(usize, usize),
    DestroyRelation(usize),
    DestroyApplication(usize),
    DestroyUnit(usize),
    RemoveUnit(usize),
    Cleanup,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0..APPS.len()).prop_map(Action::AddUnit),
        2 => (0..2usize).prop_map(Action::AddRelation),
        4 => (0..8usize, 0..2usize).prop_map(|(u, r)| Action::EnterScope(u, r)),
        3 => (0..8usize, 0..2usize).prop_map(|(u, r)| Action::LeaveScope(u, r)),
        1 => (0..2usize).prop_map(Action::DestroyRelation),
        1 => (0..APPS.len()).prop_map(Action::DestroyApplication),
        1 => (0..8usize).prop_map(Action::DestroyUnit),
        2 => (0..8usize).prop_map(Action::RemoveUnit),
        1 => Just(Action::Cleanup),
    ]
}

/// Expected refusals are fine; anything else fails the case
fn tolerated(result: FleetResult<()>) -> Result<(), TestCaseError> {
    match result {
        Ok(()) => Ok(()),
        Err(e)
            if e.is_not_found()
                || e.is_invariant_violation()
                || e.is_already_exists()
                || matches!(e.root(), FleetError::InvalidInput(_)) =>
        {
            Ok(())
        }
        Err(e) => Err(TestCaseError::fail(format!("unexpected error: {e}"))),
    }
}

fn nth_unit(st: &State, n: usize) -> FleetResult<Unit> {
    let units = st.store().find(Collection::Units, &Query::all())?;
    match units.get(n % units.len().max(1)) {
        Some((id, _)) => st.unit(st.local_id(id).unwrap_or_default()),
        None => Err(FleetError::not_found("any unit")),
    }
}

fn nth_relation(st: &State, n: usize) -> FleetResult<Relation> {
    let relations = st.relations()?;
    match relations.get(n % relations.len().max(1)) {
        Some(rel) => Ok(rel.clone()),
        None => Err(FleetError::not_found("any relation")),
    }
}

fn apply(st: &State, action: &Action) -> FleetResult<()> {
    match *action {
        Action::AddUnit(app) => st.application(APPS[app])?.add_unit().map(|_| ()),
        Action::AddRelation(pair) => st.add_relation(&pair_endpoints(pair)).map(|_| ()),
        Action::EnterScope(unit, rel) => {
            let unit = nth_unit(st, unit)?;
            nth_relation(st, rel)?.unit(&unit)?.enter_scope(Map::new())
        }
        Action::LeaveScope(unit, rel) => {
            let unit = nth_unit(st, unit)?;
            nth_relation(st, rel)?.unit(&unit)?.leave_scope()
        }
        Action::DestroyRelation(rel) => nth_relation(st, rel)?.destroy(),
        Action::DestroyApplication(app) => st.application(APPS[app])?.destroy(),
        Action::DestroyUnit(unit) => nth_unit(st, unit)?.destroy(),
        Action::RemoveUnit(unit) => {
            let mut unit = nth_unit(st, unit)?;
            unit.ensure_dead()?;
            unit.remove()
        }
        Action::Cleanup => st.cleanup().map(|_| ()),
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Life of every stored application, unit and relation incarnation
fn lives(model: &TestModel) -> BTreeMap<String, Life> {
    let mut lives = BTreeMap::new();
    for (collection, tag) in [
        (Collection::Applications, "application"),
        (Collection::Units, "unit"),
    ] {
        for (name, doc) in model.docs(collection) {
            let life: Life = serde_json::from_value(doc["life"].clone()).unwrap();
            lives.insert(format!("{tag} {name}"), life);
        }
    }
    for doc in model.docs(Collection::Relations).into_values() {
        let life: Life = serde_json::from_value(doc["life"].clone()).unwrap();
        lives.insert(format!("relation {}", doc["id"]), life);
    }
    lives
}

fn check_lives(
    before: &BTreeMap<String, Life>,
    after: &BTreeMap<String, Life>,
    gone: &mut BTreeSet<String>,
) -> Result<(), TestCaseError> {
    for (entity, life) in after {
        prop_assert!(!gone.contains(entity), "{} came back", entity);
        if let Some(previous) = before.get(entity) {
            prop_assert!(life >= previous, "{} went from {} to {}", entity, previous, life);
        }
    }
    gone.extend(before.keys().filter(|e| !after.contains_key(*e)).cloned());
    Ok(())
}

/// Destroy everything and drive every entity to removal
fn teardown(st: &State) -> FleetResult<()> {
    for name in APPS {
        match st.application(name) {
            Ok(mut app) => app.destroy()?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    let units: Vec<Unit> = st
        .store()
        .find(Collection::Units, &Query::all())?
        .into_iter()
        .filter_map(|(id, _)| st.local_id(&id).map(str::to_string))
        .map(|name| st.unit(&name))
        .collect::<FleetResult<_>>()?;
    for rel in st.relations()? {
        for unit in &units {
            if let Ok(ru) = rel.unit(unit) {
                ru.leave_scope()?;
            }
        }
    }
    st.cleanup()?;
    for mut unit in units {
        unit.ensure_dead()?;
        unit.remove()?;
    }
    st.cleanup()?;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_topology_changes_keep_invariants(actions in proptest::collection::vec(action(), 1..40)) {
        let (model, guarded) = guarded_model();
        model.apps(&APPS);

        let mut before = lives(&model);
        let mut gone = BTreeSet::new();
        for action in &actions {
            tolerated(apply(&model.st, action))?;
            model.assert_refcounts_consistent();
            let after = lives(&model);
            check_lives(&before, &after, &mut gone)?;
            before = after;
        }

        teardown(&model.st).map_err(|e| TestCaseError::fail(format!("teardown: {e}")))?;
        for collection in [
            Collection::Applications,
            Collection::Relations,
            Collection::RelationScopes,
            Collection::Units,
            Collection::Settings,
            Collection::Cleanups,
        ] {
            prop_assert_eq!(model.store.count(collection), 0, "{} not empty", collection);
        }

        let unguarded = guarded.unguarded.lock().clone();
        prop_assert!(unguarded.is_empty(), "unguarded decrements: {:?}", unguarded);
    }
}
