//! Property-based test generators using proptest.
//!
//! Two families of operations are generated:
//! - [`StorageOp`]: raw table operations, replayed against several backends
//!   to check that they behave identically
//! - [`ScenarioOp`]: controller operations on the scenario models, used to
//!   check that associations stay symmetric

use crate::schemas::obj;
use perfdb_core::{CoreResult, Database, Eid, Fields, Query, StorageBackend, Value};
use perfdb_storage::StorageError;
use proptest::prelude::*;
use serde_json::json;

/// Table every [`StorageOp`] works on.
pub const OP_TABLE: &str = "trial";

/// Field names used by generated records.
pub const OP_FIELDS: [&str; 3] = ["label", "size", "tags"];

/// Strategy for a field value matching its name's usual shape.
pub fn field_value_strategy(field: &'static str) -> BoxedStrategy<Value> {
    match field {
        "label" => prop_oneof![
            prop::sample::select(vec!["base", "opt", "debug"]).prop_map(Value::from),
            Just(Value::Null),
        ]
        .boxed(),
        "size" => (0i64..4).prop_map(Value::from).boxed(),
        _ => prop::collection::vec(0u64..5, 0..4)
            .prop_map(|items| json!(items))
            .boxed(),
    }
}

/// Strategy for record fields over [`OP_FIELDS`].
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    (
        prop::option::of(field_value_strategy("label")),
        prop::option::of(field_value_strategy("size")),
        prop::option::of(field_value_strategy("tags")),
    )
        .prop_map(|(label, size, tags)| {
            let mut fields = Fields::new();
            for (name, value) in OP_FIELDS.into_iter().zip([label, size, tags]) {
                if let Some(value) = value {
                    fields.insert(name.to_string(), value);
                }
            }
            fields
        })
}

/// A raw storage operation.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Insert a record.
    Insert(Fields),
    /// Merge fields into the record at `pick` (modulo record count).
    Update {
        /// Which existing record.
        pick: usize,
        /// Fields to merge.
        fields: Fields,
    },
    /// Unset one field on every record.
    Unset(&'static str),
    /// Remove the record at `pick`.
    Remove(usize),
    /// Search with an AND or OR field query.
    Search {
        /// Query fields.
        fields: Fields,
        /// OR instead of AND.
        match_any: bool,
    },
    /// Collection-contains search on `tags`.
    SearchInside(u64),
    /// Open a transaction scope.
    Begin,
    /// Close the innermost scope, if any.
    End {
        /// Commit instead of rolling back.
        commit: bool,
    },
}

/// Strategy for a single storage operation.
pub fn storage_op_strategy() -> impl Strategy<Value = StorageOp> {
    prop_oneof![
        3 => fields_strategy().prop_map(StorageOp::Insert),
        2 => (any::<usize>(), fields_strategy())
            .prop_map(|(pick, fields)| StorageOp::Update { pick, fields }),
        1 => prop::sample::select(OP_FIELDS.to_vec()).prop_map(StorageOp::Unset),
        1 => any::<usize>().prop_map(StorageOp::Remove),
        2 => (fields_strategy(), any::<bool>())
            .prop_map(|(fields, match_any)| StorageOp::Search { fields, match_any }),
        1 => (0u64..5).prop_map(StorageOp::SearchInside),
        1 => Just(StorageOp::Begin),
        1 => any::<bool>().prop_map(|commit| StorageOp::End { commit }),
    ]
}

/// Strategy for a sequence of storage operations.
pub fn storage_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StorageOp>> {
    prop::collection::vec(storage_op_strategy(), 1..max_len)
}

fn pick_eid(backend: &dyn StorageBackend, pick: usize) -> Result<Option<Eid>, StorageError> {
    let records = backend.search(OP_TABLE, &Query::all())?;
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records[pick % records.len()].eid))
}

/// Applies `ops` to `backend` and returns a transcript of every observable
/// result. Scopes still open at the end are committed.
///
/// Two backends honoring the same contract produce equal transcripts.
pub fn replay_storage_ops(backend: &dyn StorageBackend, ops: &[StorageOp]) -> Vec<Value> {
    let mut transcript = Vec::with_capacity(ops.len() + 1);
    for op in ops {
        let outcome = apply_storage_op(backend, op);
        transcript.push(match outcome {
            Ok(value) => value,
            Err(err) => json!({ "error": crate::integration::storage_error_kind(&err) }),
        });
    }
    while backend.transaction_depth() > 0 {
        if let Err(err) = backend.exit_transaction(true) {
            transcript.push(json!({ "error": crate::integration::storage_error_kind(&err) }));
            break;
        }
    }
    transcript.push(json!({
        "final": backend.search(OP_TABLE, &Query::all()).ok(),
        "count": backend.count(OP_TABLE).ok(),
    }));
    transcript
}

fn apply_storage_op(backend: &dyn StorageBackend, op: &StorageOp) -> Result<Value, StorageError> {
    let value = match op {
        StorageOp::Insert(fields) => json!(backend.insert(OP_TABLE, fields.clone())?),
        StorageOp::Update { pick, fields } => match pick_eid(backend, *pick)? {
            Some(eid) => json!(backend.update(OP_TABLE, fields, &Query::eid(eid))?),
            None => Value::Null,
        },
        StorageOp::Unset(field) => {
            json!(backend.unset(OP_TABLE, &[(*field).to_string()], &Query::all())?)
        }
        StorageOp::Remove(pick) => match pick_eid(backend, *pick)? {
            Some(eid) => json!(backend.remove(OP_TABLE, &Query::eid(eid))?),
            None => Value::Null,
        },
        StorageOp::Search { fields, match_any } => {
            let query = if *match_any {
                Query::any_of(fields.clone())
            } else {
                Query::all_of(fields.clone())
            };
            let eids: Vec<Eid> = backend
                .search(OP_TABLE, &query)?
                .into_iter()
                .map(|record| record.eid)
                .collect();
            json!(eids)
        }
        StorageOp::SearchInside(tag) => {
            let eids: Vec<Eid> = backend
                .search_inside(OP_TABLE, "tags", &json!(tag))?
                .into_iter()
                .map(|record| record.eid)
                .collect();
            json!(eids)
        }
        StorageOp::Begin => {
            backend.enter_transaction()?;
            json!({ "depth": backend.transaction_depth() })
        }
        StorageOp::End { commit } => {
            if backend.transaction_depth() == 0 {
                return Ok(Value::Null);
            }
            backend.exit_transaction(*commit)?;
            json!({ "depth": backend.transaction_depth() })
        }
    };
    Ok(value)
}

/// A controller operation on the scenario models.
///
/// Indices pick among existing records modulo their count.
#[derive(Debug, Clone)]
pub enum ScenarioOp {
    /// Create a project linked to some measurements.
    CreateProject {
        /// Measurements to link.
        measurements: Vec<usize>,
    },
    /// Create a measurement linked to some projects.
    CreateMeasurement {
        /// Projects to link.
        projects: Vec<usize>,
    },
    /// Replace a project's measurement set.
    SetMeasurements {
        /// The project.
        project: usize,
        /// New measurement set.
        measurements: Vec<usize>,
    },
    /// Unset a project's measurement set.
    UnsetMeasurements {
        /// The project.
        project: usize,
    },
    /// Create an experiment (with its own target and application).
    CreateExperiment {
        /// The project.
        project: usize,
        /// The measurement.
        measurement: usize,
    },
    /// Move an experiment to another project.
    MoveExperiment {
        /// The experiment.
        experiment: usize,
        /// The new project.
        project: usize,
    },
    /// Record a trial of an experiment.
    CreateTrial {
        /// The experiment.
        experiment: usize,
    },
    /// Delete a record of the named model.
    Delete {
        /// Model name.
        model: &'static str,
        /// Which record.
        pick: usize,
    },
}

/// Strategy for a single scenario operation.
pub fn scenario_op_strategy() -> impl Strategy<Value = ScenarioOp> {
    let picks = || prop::collection::vec(any::<usize>(), 0..3);
    prop_oneof![
        2 => picks().prop_map(|measurements| ScenarioOp::CreateProject { measurements }),
        2 => picks().prop_map(|projects| ScenarioOp::CreateMeasurement { projects }),
        2 => (any::<usize>(), picks()).prop_map(|(project, measurements)| {
            ScenarioOp::SetMeasurements { project, measurements }
        }),
        1 => any::<usize>().prop_map(|project| ScenarioOp::UnsetMeasurements { project }),
        2 => (any::<usize>(), any::<usize>())
            .prop_map(|(project, measurement)| ScenarioOp::CreateExperiment { project, measurement }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(experiment, project)| ScenarioOp::MoveExperiment { experiment, project }),
        2 => any::<usize>().prop_map(|experiment| ScenarioOp::CreateTrial { experiment }),
        2 => (
            prop::sample::select(vec!["project", "measurement", "experiment", "trial", "target"]),
            any::<usize>(),
        )
            .prop_map(|(model, pick)| ScenarioOp::Delete { model, pick }),
    ]
}

/// Strategy for a sequence of scenario operations.
pub fn scenario_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<ScenarioOp>> {
    prop::collection::vec(scenario_op_strategy(), 1..max_len)
}

/// Applies one scenario operation. Operations whose picks name no record
/// are skipped. `serial` keeps generated names unique.
pub fn apply_scenario_op(db: &Database, op: &ScenarioOp, serial: usize) -> CoreResult<()> {
    let eids = |model: &str| -> CoreResult<Vec<Eid>> {
        Ok(db
            .controller(model)?
            .all()?
            .into_iter()
            .map(|record| record.eid)
            .collect())
    };
    let pick_one = |model: &str, pick: usize| -> CoreResult<Option<Eid>> {
        let eids = eids(model)?;
        Ok((!eids.is_empty()).then(|| eids[pick % eids.len()]))
    };
    let pick_many = |model: &str, picks: &[usize]| -> CoreResult<Vec<Eid>> {
        let eids = eids(model)?;
        if eids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(picks.iter().map(|pick| eids[pick % eids.len()]).collect())
    };

    match op {
        ScenarioOp::CreateProject { measurements } => {
            let measurements = pick_many("measurement", measurements)?;
            db.controller("project")?.create(obj(json!({
                "name": format!("project-{serial}"),
                "measurements": measurements,
            })))?;
        }
        ScenarioOp::CreateMeasurement { projects } => {
            let projects = pick_many("project", projects)?;
            db.controller("measurement")?.create(obj(json!({
                "name": format!("measurement-{serial}"),
                "projects": projects,
            })))?;
        }
        ScenarioOp::SetMeasurements {
            project,
            measurements,
        } => {
            if let Some(project) = pick_one("project", *project)? {
                let measurements = pick_many("measurement", measurements)?;
                db.controller("project")?.update(
                    obj(json!({ "measurements": measurements })),
                    &Query::eid(project),
                )?;
            }
        }
        ScenarioOp::UnsetMeasurements { project } => {
            if let Some(project) = pick_one("project", *project)? {
                db.controller("project")?
                    .unset(&["measurements"], &Query::eid(project))?;
            }
        }
        ScenarioOp::CreateExperiment {
            project,
            measurement,
        } => {
            let (Some(project), Some(measurement)) = (
                pick_one("project", *project)?,
                pick_one("measurement", *measurement)?,
            ) else {
                return Ok(());
            };
            let target = db
                .controller("target")?
                .create(obj(json!({ "name": format!("node-{serial}") })))?;
            let application = db
                .controller("application")?
                .create(obj(json!({ "name": format!("app-{serial}") })))?;
            db.controller("experiment")?.create(obj(json!({
                "name": format!("experiment-{serial}"),
                "project": project,
                "target": target.eid,
                "application": application.eid,
                "measurement": measurement,
            })))?;
        }
        ScenarioOp::MoveExperiment {
            experiment,
            project,
        } => {
            if let (Some(experiment), Some(project)) = (
                pick_one("experiment", *experiment)?,
                pick_one("project", *project)?,
            ) {
                db.controller("experiment")?
                    .update(obj(json!({ "project": project })), &Query::eid(experiment))?;
            }
        }
        ScenarioOp::CreateTrial { experiment } => {
            if let Some(experiment) = pick_one("experiment", *experiment)? {
                db.controller("trial")?.create(obj(json!({
                    "number": serial,
                    "experiment": experiment,
                })))?;
            }
        }
        ScenarioOp::Delete { model, pick } => {
            if let Some(eid) = pick_one(model, *pick)? {
                db.controller(model)?.delete(&Query::eid(eid))?;
            }
        }
    }
    Ok(())
}
