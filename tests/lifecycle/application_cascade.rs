//! Application Cascade Tests
//!
//! Destroying applications destroys their relations in the same transaction,
//! and removing a relation removes a Dying application whose last reference
//! it held. The cascade is one hop: whatever that application's removal would
//! release in turn is left to later transactions.

use crate::common::*;

fn kinds(model: &TestModel) -> Vec<String> {
    let mut kinds: Vec<String> = model
        .docs(Collection::Cleanups)
        .into_values()
        .map(|doc| format!("{} {}", doc["kind"].as_str().unwrap(), doc["prefix"].as_str().unwrap()))
        .collect();
    kinds.sort();
    kinds
}

#[test]
fn unreferenced_application_is_removed() {
    let model = TestModel::new();
    model.apps(&["wordpress"]);
    let mut app = model.st.application("wordpress").unwrap();
    app.destroy().unwrap();

    assert!(model.st.application("wordpress").unwrap_err().is_not_found());
    assert_eq!(kinds(&model), vec!["application-settings a#wordpress#".to_string()]);
    model.st.cleanup().unwrap();
    assert!(model.settings_ids().is_empty());
}

#[test]
fn destroying_application_removes_unoccupied_relations() {
    let model = TestModel::new();
    model.wordpress_mysql();
    model.apps(&["memcached"]);
    model
        .st
        .add_relation(&[
            Endpoint::requirer("wordpress", "cache", "memcache"),
            Endpoint::provider("memcached", "cache", "memcache"),
        ])
        .unwrap();

    let mut wordpress = model.st.application("wordpress").unwrap();
    assert_eq!(wordpress.relation_count(), 2);
    wordpress.destroy().unwrap();

    assert!(model.st.relations().unwrap().is_empty());
    assert!(model.st.application("wordpress").unwrap_err().is_not_found());
    // The other ends are Alive, so they only lose a reference.
    assert_eq!(model.st.application("mysql").unwrap().relation_count(), 0);
    assert_eq!(model.st.application("memcached").unwrap().life(), Life::Alive);
    model.assert_refcounts_consistent();
}

#[test]
fn application_with_units_dies_and_queues_its_units() {
    let model = TestModel::new();
    model.apps(&["wordpress"]);
    let app = model.st.application("wordpress").unwrap();
    app.add_unit().unwrap();
    app.add_unit().unwrap();

    let mut app = model.st.application("wordpress").unwrap();
    app.destroy().unwrap();
    assert_eq!(app.life(), Life::Dying);
    assert_eq!(
        kinds(&model),
        vec!["dying-application-units wordpress".to_string()]
    );

    let err = app.add_unit().unwrap_err();
    assert!(err.is_invariant_violation(), "{err}");

    model.st.cleanup().unwrap();
    for mut unit in app.units().unwrap() {
        assert_eq!(unit.life(), Life::Dying);
        unit.ensure_dead().unwrap();
        unit.remove().unwrap();
    }
    assert!(model.st.application("wordpress").unwrap_err().is_not_found());
    assert_eq!(kinds(&model), vec!["application-settings a#wordpress#".to_string()]);
}

/// Both ends of a relation are destroyed while a unit of one end is still in
/// scope. The unit's departure removes the relation and the other, now
/// unreferenced, application; its own application only loses a reference
/// and goes when the unit does.
#[test]
fn last_departure_removes_relation_and_dying_peer_application() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let unit = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let ru = rel.unit(&unit).unwrap();
    ru.enter_scope(Map::new()).unwrap();

    let mut mysql = model.st.application("mysql").unwrap();
    mysql.destroy().unwrap();
    mysql.refresh().unwrap();
    assert_eq!(mysql.life(), Life::Dying);
    assert_eq!(mysql.relation_count(), 1);
    assert_eq!(model.st.relation(rel.key()).unwrap().life(), Life::Dying);

    let mut wordpress = model.st.application("wordpress").unwrap();
    wordpress.destroy().unwrap();
    wordpress.refresh().unwrap();
    assert_eq!(wordpress.life(), Life::Dying);

    ru.leave_scope().unwrap();
    assert!(model.st.relation(rel.key()).unwrap_err().is_not_found());
    assert!(model.st.application("mysql").unwrap_err().is_not_found());
    wordpress.refresh().unwrap();
    assert_eq!(wordpress.relation_count(), 0);
    assert_eq!(wordpress.unit_count(), 1);
    model.assert_refcounts_consistent();

    let mut unit = model.st.unit(unit.name()).unwrap();
    unit.ensure_dead().unwrap();
    unit.remove().unwrap();
    assert!(model.st.application("wordpress").unwrap_err().is_not_found());

    model.st.cleanup().unwrap();
    assert!(!model.st.needs_cleanup().unwrap());
    assert!(model.settings_ids().is_empty());
}

#[test]
fn unit_in_scope_blocks_its_removal() {
    let model = TestModel::new();
    let rel = model.wordpress_mysql();
    let mut unit = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let ru = rel.unit(&unit).unwrap();
    ru.enter_scope(Map::new()).unwrap();
    unit.ensure_dead().unwrap();

    let err = unit.remove().unwrap_err();
    assert!(err.is_invariant_violation(), "{err}");
    ru.leave_scope().unwrap();
    unit.remove().unwrap();
    assert_eq!(model.st.application("wordpress").unwrap().unit_count(), 0);
    model.assert_refcounts_consistent();
}

#[test]
fn dying_remote_end_removed_with_relation() {
    let model = TestModel::new();
    model.apps(&["wordpress"]);
    model.st.add_remote_application("mysql", "other-model").unwrap();
    let rel = model
        .st
        .add_relation(&[
            Endpoint::requirer("wordpress", "db", "mysql"),
            Endpoint::provider("mysql", "server", "mysql").remote(),
        ])
        .unwrap();
    let unit = model.st.application("wordpress").unwrap().add_unit().unwrap();
    let ru = rel.unit(&unit).unwrap();
    ru.enter_scope(Map::new()).unwrap();

    let mut mysql = model.st.remote_application("mysql").unwrap();
    mysql.destroy().unwrap();
    assert_eq!(model.st.remote_application("mysql").unwrap().life(), Life::Dying);

    ru.leave_scope().unwrap();
    assert!(model.st.remote_application("mysql").unwrap_err().is_not_found());
    assert_eq!(model.st.application("wordpress").unwrap().relation_count(), 0);
    model.assert_refcounts_consistent();
}
