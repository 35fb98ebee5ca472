//! Relation Lifecycle Tests
//!
//! Destroy, scope departure and removal of relations:
//! - Dying relations wait for their last unit
//! - Removal releases application references and queues settings cleanup
//! - Peer relations cannot be destroyed on their own
//! - Stale snapshots never touch a newer incarnation

use crate::common::*;
use fleetstate::CleanupReport;

fn cleanup_records(model: &TestModel) -> Vec<(String, String)> {
    model
        .docs(Collection::Cleanups)
        .into_values()
        .map(|doc| {
            (
                doc["kind"].as_str().unwrap().to_string(),
                doc["prefix"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

// ============================================================================
// Destroy with units in scope
// ============================================================================

#[test]
fn relation_with_units_dies_then_last_departure_removes_it() {
    let model = TestModel::new();
    for _ in 0..7 {
        model.st.sequence("relation").unwrap();
    }
    let mut rel = model.wordpress_mysql();
    assert_eq!(rel.id(), 7);

    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let mysql = model.st.application("mysql").unwrap().add_unit().unwrap();
    let wp_ru = rel.unit(&wordpress).unwrap();
    let my_ru = rel.unit(&mysql).unwrap();
    wp_ru.enter_scope(settings(&[("host", "wp-0")])).unwrap();
    my_ru.enter_scope(settings(&[("host", "db-0")])).unwrap();

    rel.destroy().unwrap();
    rel.refresh().unwrap();
    assert_eq!(rel.life(), Life::Dying);
    assert_eq!(rel.unit_count(), 2);
    assert!(!model.st.needs_cleanup().unwrap());

    wp_ru.leave_scope().unwrap();
    rel.refresh().unwrap();
    assert_eq!(rel.life(), Life::Dying);
    assert_eq!(rel.unit_count(), 1);

    my_ru.leave_scope().unwrap();
    assert!(rel.refresh().unwrap_err().is_not_found());
    assert!(model.st.relation("mysql:server wordpress:db").unwrap_err().is_not_found());
    assert_eq!(model.st.application("wordpress").unwrap().relation_count(), 0);
    assert_eq!(model.st.application("mysql").unwrap().relation_count(), 0);
    assert_eq!(
        cleanup_records(&model),
        vec![("relation-settings".to_string(), "r#7#".to_string())]
    );

    // Unit settings outlive scope membership until the cleanup pass.
    assert_eq!(wp_ru.settings().unwrap()["host"], "wp-0");
    let report = model.st.cleanup().unwrap();
    assert_eq!(
        report,
        CleanupReport {
            records: 1,
            documents: 2,
            failed: 0
        }
    );
    assert_eq!(
        model.settings_ids(),
        vec!["a#mysql#config".to_string(), "a#wordpress#config".to_string()]
    );
    assert!(wp_ru.settings().unwrap_err().is_not_found());

    assert_eq!(model.st.cleanup().unwrap(), CleanupReport::default());
    model.assert_refcounts_consistent();
}

#[test]
fn relation_without_units_is_removed_immediately() {
    let model = TestModel::new();
    let mut rel = model.wordpress_mysql();
    rel.destroy().unwrap();

    assert!(model.docs(Collection::Relations).is_empty());
    assert_eq!(model.st.application("wordpress").unwrap().relation_count(), 0);
    assert!(model.st.needs_cleanup().unwrap());
    model.assert_refcounts_consistent();
}

#[test]
fn dying_relation_refuses_new_members() {
    let model = TestModel::new();
    let mut rel = model.wordpress_mysql();
    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let mysql = model.st.application("mysql").unwrap().add_unit().unwrap();
    rel.unit(&wordpress).unwrap().enter_scope(Map::new()).unwrap();
    rel.destroy().unwrap();

    let err = rel.unit(&mysql).unwrap().enter_scope(Map::new()).unwrap_err();
    assert!(err.is_invariant_violation(), "{err}");
    model.assert_refcounts_consistent();
}

// ============================================================================
// Idempotence and refusals
// ============================================================================

#[test]
fn destroying_a_dying_relation_changes_nothing() {
    let model = TestModel::new();
    let mut rel = model.wordpress_mysql();
    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    rel.unit(&wordpress).unwrap().enter_scope(Map::new()).unwrap();
    rel.destroy().unwrap();

    let revision = model.st.store().revision();
    rel.destroy().unwrap();
    let mut fresh = model.st.relation(rel.key()).unwrap();
    fresh.destroy().unwrap();
    assert_eq!(model.st.store().revision(), revision);
}

#[test]
fn destroying_a_removed_relation_succeeds() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let mut stale = rel.clone();
    rel.clone().destroy().unwrap();

    let revision = model.st.store().revision();
    stale.destroy().unwrap();
    assert_eq!(model.st.store().revision(), revision);
}

#[test]
fn solitary_peer_relation_cannot_be_destroyed() {
    let model = TestModel::new();
    model.apps(&["riak"]);
    let mut rel = model
        .st
        .add_relation(&[Endpoint::peer("riak", "ring", "riak")])
        .unwrap();
    let before = model.docs(Collection::Relations);
    let revision = model.st.store().revision();

    let err = rel.destroy().unwrap_err();
    assert!(err.is_invariant_violation());
    assert_eq!(model.st.store().revision(), revision);
    assert_eq!(model.docs(Collection::Relations), before);
}

#[test]
fn stale_snapshot_leaves_new_incarnation_alone() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let endpoints = rel.endpoints().to_vec();
    let mut stale = rel.clone();
    rel.clone().destroy().unwrap();
    model.st.cleanup().unwrap();

    let current = model.st.add_relation(&endpoints).unwrap();
    assert_ne!(current.id(), stale.id());
    stale.destroy().unwrap();

    let stored = model.st.relation(current.key()).unwrap();
    assert_eq!(stored.id(), current.id());
    assert_eq!(stored.life(), Life::Alive);
    assert_eq!(model.st.application("mysql").unwrap().relation_count(), 1);
    model.assert_refcounts_consistent();
}

#[test]
fn leaving_with_a_snapshot_from_before_entering() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let early = rel.unit(&wordpress).unwrap();

    early.enter_scope(Map::new()).unwrap();
    early.leave_scope().unwrap();
    assert!(!early.in_scope().unwrap());
    assert_eq!(model.st.relation(rel.key()).unwrap().unit_count(), 0);
    early.leave_scope().unwrap();
    model.assert_refcounts_consistent();
}

#[test]
fn subordinates_share_the_principal_container_scope() {
    let model = TestModel::new();
    model.apps(&["wordpress", "logging"]);
    let rel = model
        .st
        .add_relation(&[
            Endpoint::provider("wordpress", "juju-info", "juju-info")
                .with_scope(fleetstate::RelationScope::Container),
            Endpoint::requirer("logging", "info", "juju-info"),
        ])
        .unwrap();
    let principal = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let sub = model
        .st
        .application("logging")
        .unwrap()
        .add_subordinate_unit(&principal)
        .unwrap();

    rel.unit(&principal).unwrap().enter_scope(Map::new()).unwrap();
    rel.unit(&sub).unwrap().enter_scope(Map::new()).unwrap();
    let scopes: Vec<String> = model.docs(Collection::RelationScopes).into_keys().collect();
    let container = format!("r#{}#wordpress/0#", rel.id());
    assert_eq!(scopes.len(), 2);
    assert!(scopes.iter().all(|key| key.starts_with(&container)), "{scopes:?}");
    model.assert_refcounts_consistent();
}
