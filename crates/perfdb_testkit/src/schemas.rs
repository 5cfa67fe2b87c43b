//! Model schemas of the performance toolchain scenario.
//!
//! ```text
//! project  <-> measurement     many-to-many, both optional
//! project  <-> experiment      experiment.project is required
//! target   <-> experiment      experiment.target is required
//! application <-> experiment   experiment.application is required
//! measurement <-> experiment   experiment.measurement is required
//! experiment  <-> trial        trial.experiment is required
//! ```
//!
//! Deleting a project therefore cascades to its experiments and their
//! trials, while measurements merely lose the link.

use perfdb_core::{Attribute, AttributeType, Fields, Schema, SchemaRegistry, Value};
use std::sync::Arc;

/// Converts a JSON object literal into record fields.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn obj(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// The `project` model.
pub fn project_schema() -> Schema {
    Schema::builder("project")
        .attribute(
            Attribute::scalar("name", AttributeType::String)
                .required()
                .unique()
                .description("Project name"),
        )
        .attribute(Attribute::collection("measurements", "measurement", "projects"))
        .attribute(Attribute::collection("experiments", "experiment", "project"))
        .attribute(Attribute::scalar("description", AttributeType::String))
        .build()
        .expect("project schema")
}

/// The `target` model: a machine the application runs on.
pub fn target_schema() -> Schema {
    Schema::builder("target")
        .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
        .attribute(
            Attribute::scalar("host_os", AttributeType::String)
                .required()
                .default_value("Linux")
                .hashed(),
        )
        .attribute(
            Attribute::scalar("host_arch", AttributeType::String)
                .required()
                .default_value("x86_64")
                .hashed(),
        )
        .attribute(Attribute::scalar("compilers", AttributeType::Array).hashed())
        .attribute(Attribute::collection("experiments", "experiment", "target"))
        .build()
        .expect("target schema")
}

/// The `application` model.
pub fn application_schema() -> Schema {
    Schema::builder("application")
        .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
        .attribute(
            Attribute::scalar("openmp", AttributeType::Boolean)
                .required()
                .default_value(false),
        )
        .attribute(
            Attribute::scalar("mpi", AttributeType::Boolean)
                .required()
                .default_value(false),
        )
        .attribute(Attribute::collection("experiments", "experiment", "application"))
        .build()
        .expect("application schema")
}

/// The `measurement` model: how the application is instrumented.
pub fn measurement_schema() -> Schema {
    Schema::builder("measurement")
        .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
        .attribute(Attribute::collection("projects", "project", "measurements"))
        .attribute(Attribute::collection("experiments", "experiment", "measurement"))
        .attribute(
            Attribute::scalar("profile", AttributeType::Boolean)
                .required()
                .default_value(true),
        )
        .attribute(
            Attribute::scalar("trace", AttributeType::Boolean)
                .required()
                .default_value(false),
        )
        .build()
        .expect("measurement schema")
}

/// The `experiment` model: one combination of the four above.
///
/// Its references declare no `via`; each is paired with the
/// `experiments` collection that names it.
pub fn experiment_schema() -> Schema {
    Schema::builder("experiment")
        .attribute(Attribute::scalar("name", AttributeType::String).required())
        .attribute(Attribute::model("project", "project").required())
        .attribute(Attribute::model("target", "target").required())
        .attribute(Attribute::model("application", "application").required())
        .attribute(Attribute::model("measurement", "measurement").required())
        .attribute(Attribute::collection("trials", "trial", "experiment"))
        .build()
        .expect("experiment schema")
}

/// The `trial` model: one recorded run of an experiment.
pub fn trial_schema() -> Schema {
    Schema::builder("trial")
        .attribute(Attribute::scalar("number", AttributeType::Integer).required())
        .attribute(Attribute::model("experiment", "experiment").required())
        .attribute(Attribute::scalar("begin_time", AttributeType::Datetime))
        .attribute(Attribute::scalar("data_size", AttributeType::Integer))
        .build()
        .expect("trial schema")
}

/// All six scenario models.
pub fn hpc_registry() -> Arc<SchemaRegistry> {
    let schemas = [
        project_schema(),
        target_schema(),
        application_schema(),
        measurement_schema(),
        experiment_schema(),
        trial_schema(),
    ];
    Arc::new(SchemaRegistry::new(schemas).expect("scenario registry"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_closes() {
        let registry = hpc_registry();
        assert_eq!(registry.models().count(), 6);

        let back: Vec<_> = registry
            .back_references("experiment")
            .iter()
            .map(|b| b.model.as_str())
            .collect();
        assert!(back.contains(&"project"));
        assert!(back.contains(&"trial"));

        assert_eq!(registry.via_name("experiment", "project"), Some("experiments"));
        assert_eq!(registry.via_name("trial", "experiment"), Some("trials"));
    }
}
