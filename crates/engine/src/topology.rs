//! Adding entities to a model
//!
//! Creation is the only place new references are taken: adding a relation
//! increments the relation count of each application it names, and adding a
//! unit increments its application's unit count (see
//! [`Application::add_unit`]). Both require the referenced applications to be
//! Alive at commit time.

use serde_json::{Map, Value};
use tracing::info;

use fleetstate_concurrency::{Build, TxnOutcome};
use fleetstate_core::{
    fields, Assert, Collection, Document, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};

use crate::application::{application_settings_key, application_settings_prefix, Application};
use crate::cleanup::{CleanupDoc, CleanupKind};
use crate::machine::Machine;
use crate::records::{
    ApplicationDoc, Endpoint, MachineDoc, RelationDoc, RelationScope, RemoteApplicationDoc, Role,
};
use crate::relation::{relation_key, Relation};
use crate::remote_application::RemoteApplication;
use crate::state::State;

const SETTINGS_FIELD: &str = "settings";

/// Whether `name` is a valid application name
///
/// Lowercase letters, digits and hyphens, starting with a letter and not
/// ending with a hyphen.
pub fn is_valid_application_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    !name.ends_with('-')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl State {
    fn check_application_name(&self, name: &str) -> FleetResult<()> {
        if !is_valid_application_name(name) {
            return Err(FleetError::invalid_input(format!(
                "invalid application name {name:?}"
            )));
        }
        Ok(())
    }

    /// Local or remote application with `name`, if either exists
    fn application_exists(&self, name: &str) -> FleetResult<bool> {
        let id = self.doc_id(name);
        Ok(self.store().get(Collection::Applications, &id)?.is_some()
            || self.store().get(Collection::RemoteApplications, &id)?.is_some())
    }

    fn cleanup_pending_for(&self, name: &str) -> FleetResult<bool> {
        let settings = Assert::field_eq("kind", CleanupKind::ApplicationSettings.as_str())
            .and(Assert::field_eq("prefix", application_settings_prefix(name)));
        let units = Assert::field_eq("kind", CleanupKind::DyingApplicationUnits.as_str())
            .and(Assert::field_eq("prefix", name));
        let pending: Vec<CleanupDoc> =
            self.find_records(Collection::Cleanups, Some(Assert::Or(vec![settings, units])))?;
        Ok(!pending.is_empty())
    }

    /// Add a local application with its initial settings
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an invalid name
    /// - `AlreadyExists` if a local or remote application has the name
    /// - `InvariantViolation` while cleanup of a removed application of the
    ///   same name is still pending
    pub fn add_application(
        &self,
        name: &str,
        settings: Map<String, Value>,
    ) -> FleetResult<Application> {
        let context = || format!("cannot add application {name:?}");
        self.check_application_name(name).annotate(context)?;

        let record = ApplicationDoc {
            name: name.to_string(),
            model_uuid: self.model_uuid().to_string(),
            life: Life::Alive,
            unit_count: 0,
            relation_count: 0,
        };
        let doc = Document::from_record(&record)?;
        let id = self.doc_id(name);
        let settings_id = self.doc_id(&application_settings_key(name));

        self.runner()
            .run(|_| {
                if self.application_exists(name)? {
                    return Err(FleetError::AlreadyExists {
                        entity: format!("application {name:?}"),
                    });
                }
                if self.cleanup_pending_for(name)? {
                    return Err(FleetError::invariant(
                        format!("application {name:?}"),
                        "a previous application of that name is awaiting cleanup",
                    ));
                }
                let value = Value::Object(settings.clone());
                let settings_op = if self.store().get(Collection::Settings, &settings_id)?.is_some()
                {
                    Op::update(
                        Collection::Settings,
                        &settings_id,
                        vec![Mutation::set(SETTINGS_FIELD, value)],
                    )
                } else {
                    Op::insert(
                        Collection::Settings,
                        &settings_id,
                        Document::new().with(SETTINGS_FIELD, value),
                    )
                };
                Ok(Build::ops(vec![
                    Op::assert(Collection::RemoteApplications, &id, Assert::DocMissing),
                    Op::insert(Collection::Applications, &id, doc.clone()),
                    settings_op,
                ]))
            })
            .annotate(context)?;

        info!(target: "fleet::topology", application = %name, "application added");
        Ok(Application::new(self.clone(), record))
    }

    /// Add an application offered from another model
    pub fn add_remote_application(
        &self,
        name: &str,
        source_model: &str,
    ) -> FleetResult<RemoteApplication> {
        let context = || format!("cannot add remote application {name:?}");
        self.check_application_name(name).annotate(context)?;

        let record = RemoteApplicationDoc {
            name: name.to_string(),
            model_uuid: self.model_uuid().to_string(),
            source_model: source_model.to_string(),
            life: Life::Alive,
            relation_count: 0,
        };
        let doc = Document::from_record(&record)?;
        let id = self.doc_id(name);

        self.runner()
            .run(|_| {
                if self.application_exists(name)? {
                    return Err(FleetError::AlreadyExists {
                        entity: format!("application {name:?}"),
                    });
                }
                Ok(Build::ops(vec![
                    Op::assert(Collection::Applications, &id, Assert::DocMissing),
                    Op::insert(Collection::RemoteApplications, &id, doc.clone()),
                ]))
            })
            .annotate(context)?;

        info!(target: "fleet::topology", application = %name, source_model = %source_model, "remote application added");
        Ok(RemoteApplication::new(self.clone(), record))
    }

    /// Add a relation between `endpoints`
    ///
    /// Either a single peer endpoint, or a provider and a requirer of the same
    /// interface on different applications. If either endpoint is container
    /// scoped the whole relation is.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the endpoints cannot form a relation
    /// - `AlreadyExists` if the relation exists
    /// - `NotFound` if an application is missing
    /// - `InvariantViolation` if an application is not Alive
    pub fn add_relation(&self, endpoints: &[Endpoint]) -> FleetResult<Relation> {
        let key = relation_key(endpoints);
        let context = || format!("cannot add relation {key:?}");
        check_endpoints(endpoints).annotate(context)?;

        let mut endpoints = endpoints.to_vec();
        if endpoints.iter().any(|ep| ep.scope == RelationScope::Container) {
            for ep in &mut endpoints {
                ep.scope = RelationScope::Container;
            }
        }

        let id = self.doc_id(&key);
        if self.store().get(Collection::Relations, &id)?.is_some() {
            return Err(relation_exists(&key).annotate(context()));
        }
        let relation_id = self.sequence("relation").annotate(context)?;
        let record = RelationDoc {
            key: key.clone(),
            model_uuid: self.model_uuid().to_string(),
            id: relation_id,
            endpoints,
            life: Life::Alive,
            unit_count: 0,
        };
        let doc = Document::from_record(&record)?;

        self.runner()
            .run(|_| {
                if self.store().get(Collection::Relations, &id)?.is_some() {
                    return Err(relation_exists(&key));
                }
                let mut ops = Vec::with_capacity(record.endpoints.len() + 1);
                for ep in &record.endpoints {
                    let collection = self.refcount_for(ep.source).collection();
                    let app_id = self.doc_id(&ep.application_name);
                    let entity = || format!("application {:?}", ep.application_name);
                    let app = self
                        .store()
                        .get(collection, &app_id)?
                        .ok_or_else(|| FleetError::not_found(entity()))?;
                    if !Assert::is_alive().matches(Some(&app)) {
                        return Err(FleetError::invariant(entity(), "is not alive"));
                    }
                    ops.push(
                        Op::update(
                            collection,
                            app_id,
                            vec![Mutation::inc(fields::RELATION_COUNT, 1)],
                        )
                        .with_assert(Assert::is_alive()),
                    );
                }
                ops.push(Op::insert(Collection::Relations, &id, doc.clone()));
                Ok(Build::ops(ops))
            })
            .annotate(context)?;

        info!(target: "fleet::topology", relation = %key, id = relation_id, "relation added");
        Ok(Relation::new(self.clone(), record))
    }

    /// Add a machine running `series`
    pub fn add_machine(&self, series: &str) -> FleetResult<Machine> {
        let context = || "cannot add machine".to_string();
        let machine_id = self.sequence("machine").annotate(context)?.to_string();
        let record = MachineDoc {
            machine_id: machine_id.clone(),
            model_uuid: self.model_uuid().to_string(),
            life: Life::Alive,
            series: series.to_string(),
        };
        let doc = Document::from_record(&record)?;
        let id = self.doc_id(&machine_id);
        let outcome = self
            .runner()
            .run(|_| Ok(Build::ops(vec![Op::insert(Collection::Machines, &id, doc.clone())])))
            .annotate(context)?;
        if let TxnOutcome::NoOpNeeded { .. } = outcome {
            return Err(FleetError::store("machine insert produced no operations"));
        }
        info!(target: "fleet::topology", machine = %machine_id, series = %series, "machine added");
        Ok(Machine::new(self.clone(), record))
    }
}

fn relation_exists(key: &str) -> FleetError {
    FleetError::AlreadyExists {
        entity: format!("relation {key:?}"),
    }
}

fn check_endpoints(endpoints: &[Endpoint]) -> FleetResult<()> {
    match endpoints {
        [ep] if ep.role == Role::Peer => Ok(()),
        [ep] => Err(FleetError::invalid_input(format!(
            "single endpoint {ep} must be a peer"
        ))),
        [a, b] if a.can_relate_to(b) => Ok(()),
        [a, b] => Err(FleetError::invalid_input(format!(
            "endpoints {a} and {b} cannot be related"
        ))),
        _ => Err(FleetError::invalid_input(format!(
            "a relation needs one or two endpoints, got {}",
            endpoints.len()
        ))),
    }
}
