//! Referential integrity check.

use crate::database::Database;
use crate::error::CoreResult;
use perfdb_storage::{Eid, Query};
use std::fmt;

/// A problem found by [`Database::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// A stored field is not declared by the model's schema.
    UnknownAttribute {
        /// Model of the record.
        model: String,
        /// The record.
        eid: Eid,
        /// The undeclared field.
        attribute: String,
    },
    /// A required attribute is absent.
    MissingRequired {
        /// Model of the record.
        model: String,
        /// The record.
        eid: Eid,
        /// The missing attribute.
        attribute: String,
    },
    /// An association names a record that does not exist.
    DanglingReference {
        /// Model of the record.
        model: String,
        /// The record.
        eid: Eid,
        /// The association attribute.
        attribute: String,
        /// Referenced model.
        target_model: String,
        /// Missing EID.
        target_eid: Eid,
    },
    /// A two-way association is only recorded on one side.
    AsymmetricLink {
        /// Model of the record.
        model: String,
        /// The record.
        eid: Eid,
        /// The association attribute.
        attribute: String,
        /// Referenced model.
        target_model: String,
        /// Referenced record.
        target_eid: Eid,
        /// Back-reference on the target that lacks `eid`.
        via: String,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAttribute {
                model,
                eid,
                attribute,
            } => write!(f, "{model} {eid}: undeclared attribute {attribute}"),
            Self::MissingRequired {
                model,
                eid,
                attribute,
            } => write!(f, "{model} {eid}: missing required attribute {attribute}"),
            Self::DanglingReference {
                model,
                eid,
                attribute,
                target_model,
                target_eid,
            } => write!(
                f,
                "{model} {eid}: {attribute} references missing {target_model} {target_eid}"
            ),
            Self::AsymmetricLink {
                model,
                eid,
                attribute,
                target_model,
                target_eid,
                via,
            } => write!(
                f,
                "{model} {eid}: {attribute} -> {target_model} {target_eid}, but {target_model}.{via} does not point back"
            ),
        }
    }
}

pub(crate) fn check(db: &Database) -> CoreResult<Vec<IntegrityIssue>> {
    let backend = db.backend();
    let registry = db.registry();
    let mut issues = Vec::new();

    for schema in registry.schemas() {
        let model = schema.name();
        for record in backend.search(model, &Query::all())? {
            for key in record.fields.keys() {
                if schema.attribute(key).is_none() {
                    issues.push(IntegrityIssue::UnknownAttribute {
                        model: model.to_string(),
                        eid: record.eid,
                        attribute: key.clone(),
                    });
                }
            }

            for attr in schema.attributes() {
                let Some(value) = record.get(&attr.name) else {
                    if attr.is_required() {
                        issues.push(IntegrityIssue::MissingRequired {
                            model: model.to_string(),
                            eid: record.eid,
                            attribute: attr.name.clone(),
                        });
                    }
                    continue;
                };
                let Some(target_model) = attr.target() else {
                    continue;
                };

                for target_eid in attr.referenced_eids(value) {
                    let Some(target) = backend.get(target_model, &Query::eid(target_eid))? else {
                        issues.push(IntegrityIssue::DanglingReference {
                            model: model.to_string(),
                            eid: record.eid,
                            attribute: attr.name.clone(),
                            target_model: target_model.to_string(),
                            target_eid,
                        });
                        continue;
                    };
                    if let Some(via) = registry.via_name(model, &attr.name) {
                        if !target.eids(via).contains(&record.eid) {
                            issues.push(IntegrityIssue::AsymmetricLink {
                                model: model.to_string(),
                                eid: record.eid,
                                attribute: attr.name.clone(),
                                target_model: target_model.to_string(),
                                target_eid,
                                via: via.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::{Attribute, AttributeType, Schema, SchemaRegistry};
    use serde_json::json;

    fn db() -> Database {
        let project = Schema::builder("project")
            .attribute(Attribute::scalar("name", AttributeType::String).required())
            .attribute(Attribute::collection("measurements", "measurement", "projects"))
            .build()
            .unwrap();
        let measurement = Schema::builder("measurement")
            .attribute(Attribute::collection("projects", "project", "measurements"))
            .build()
            .unwrap();
        let registry = SchemaRegistry::new([project, measurement]).unwrap();
        Database::open(Config::default(), registry).unwrap()
    }

    #[test]
    fn clean_database_has_no_issues() {
        let db = db();
        let m = db
            .controller("measurement")
            .unwrap()
            .create(json!({}).as_object().unwrap().clone())
            .unwrap();
        db.controller("project")
            .unwrap()
            .create(json!({"name": "p", "measurements": [m.eid]}).as_object().unwrap().clone())
            .unwrap();
        assert!(db.verify().unwrap().is_empty());
    }

    #[test]
    fn raw_writes_are_reported() {
        let db = db();
        let raw = db.backend();
        raw.insert("measurement", json!({"colour": 1}).as_object().unwrap().clone())
            .unwrap();
        let p = raw
            .insert(
                "project",
                json!({"measurements": [1, 7]}).as_object().unwrap().clone(),
            )
            .unwrap();

        let issues = db.verify().unwrap();
        assert!(issues.contains(&IntegrityIssue::MissingRequired {
            model: "project".into(),
            eid: p.eid,
            attribute: "name".into(),
        }));
        assert!(issues.iter().any(|i| matches!(i, IntegrityIssue::UnknownAttribute { .. })));
        assert!(issues.iter().any(|i| matches!(i, IntegrityIssue::DanglingReference { target_eid, .. } if target_eid.as_u64() == 7)));
        assert!(issues.iter().any(|i| matches!(i, IntegrityIssue::AsymmetricLink { target_eid, .. } if target_eid.as_u64() == 1)));
    }
}
