//! Conflict Retry Tests
//!
//! A before-commit hook lets a second writer commit between a transition's
//! read and its submit. The transition's assertions reject the stale
//! operation set and the retry sees the new state.

use crate::common::*;
use fleetstate::fleetstate_storage::testing::{before_hook, noop_hook};

fn cleanup_kinds(model: &TestModel) -> Vec<String> {
    model
        .docs(Collection::Cleanups)
        .into_values()
        .map(|doc| doc["kind"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn relation_destroy_loses_to_application_destroy() {
    let model = TestModel::new();
    let mut rel = model.wordpress_mysql();

    let racer = model.st.clone();
    model.store.set_before_hooks(vec![before_hook(move || {
        racer.application("mysql").unwrap().destroy().unwrap();
    })]);
    let before = model.st.runner().metrics().stats();
    rel.destroy().unwrap();
    let after = model.st.runner().metrics().stats();

    assert_eq!(model.store.pending_hooks(), 0);
    assert!(after.conflicts > before.conflicts);
    assert!(model.st.relation(rel.key()).unwrap_err().is_not_found());
    assert!(model.st.application("mysql").unwrap_err().is_not_found());
    assert_eq!(model.st.application("wordpress").unwrap().relation_count(), 0);

    let mut kinds = cleanup_kinds(&model);
    kinds.sort();
    assert_eq!(kinds, vec!["application-settings", "relation-settings"]);
    model.assert_refcounts_consistent();
}

#[test]
fn unit_entering_turns_removal_into_dying() {
    let model = TestModel::new();
    let mut rel = model.wordpress_mysql();
    let unit = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let ru = rel.unit(&unit).unwrap();

    let entering = ru.clone();
    model.store.set_before_hooks(vec![before_hook(move || {
        entering.enter_scope(Map::new()).unwrap();
    })]);
    rel.destroy().unwrap();

    let stored = model.st.relation(rel.key()).unwrap();
    assert_eq!(stored.life(), Life::Dying);
    assert_eq!(stored.unit_count(), 1);
    assert!(!model.st.needs_cleanup().unwrap());

    ru.leave_scope().unwrap();
    assert!(model.st.relation(rel.key()).unwrap_err().is_not_found());
    model.assert_refcounts_consistent();
}

#[test]
fn racing_departures_remove_relation_once() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let mysql = model.st.application("mysql").unwrap().add_unit().unwrap();
    rel.unit(&wordpress).unwrap().enter_scope(Map::new()).unwrap();
    rel.unit(&mysql).unwrap().enter_scope(Map::new()).unwrap();

    let mut rel = model.st.relation(rel.key()).unwrap();
    rel.destroy().unwrap();
    let rel = model.st.relation(rel.key()).unwrap();
    let first = rel.unit(&wordpress).unwrap();
    let second = rel.unit(&mysql).unwrap();

    model.store.set_before_hooks(vec![before_hook(move || {
        second.leave_scope().unwrap();
    })]);
    first.leave_scope().unwrap();

    assert!(model.st.relation(rel.key()).unwrap_err().is_not_found());
    assert_eq!(cleanup_kinds(&model), vec!["relation-settings"]);
    model.assert_refcounts_consistent();
}

#[test]
fn stale_application_snapshot_sees_new_relation() {
    let model = TestModel::new();
    model.apps(&["wordpress", "mysql"]);
    let mut wordpress = model.st.application("wordpress").unwrap();
    wordpress.add_unit().unwrap();
    let mut wordpress = model.st.application("wordpress").unwrap();

    let racer = model.st.clone();
    model.store.set_before_hooks(vec![before_hook(move || {
        racer.add_relation(&db_endpoints("wordpress", "mysql")).unwrap();
    })]);
    wordpress.destroy().unwrap();

    wordpress.refresh().unwrap();
    assert_eq!(wordpress.life(), Life::Dying);
    // The relation added mid-destroy was removed with it.
    assert!(model.st.relations().unwrap().is_empty());
    assert_eq!(wordpress.relation_count(), 0);
    model.assert_refcounts_consistent();
}

#[test]
fn hooks_apply_one_per_submit() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let mysql = model.st.application("mysql").unwrap().add_unit().unwrap();
    let leaving = rel.unit(&wordpress).unwrap();
    leaving.enter_scope(Map::new()).unwrap();
    let mut stale = model.st.relation(rel.key()).unwrap();
    assert_eq!(stale.unit_count(), 1);

    let entering = rel.unit(&mysql).unwrap();
    model.store.set_before_hooks(vec![
        noop_hook(),
        before_hook(move || entering.enter_scope(Map::new()).unwrap()),
    ]);
    leaving.leave_scope().unwrap();
    assert_eq!(model.store.pending_hooks(), 1);

    // The stale count is right again by the time the destroy commits.
    stale.destroy().unwrap();
    assert_eq!(model.store.pending_hooks(), 0);
    let stored = model.st.relation(rel.key()).unwrap();
    assert_eq!(stored.life(), Life::Dying);
    assert_eq!(stored.unit_count(), 1);
    model.assert_refcounts_consistent();
}
