//! Relationship-aware CRUD over one model.
//!
//! A [`Controller`] binds one [`Schema`] to the database's storage. Writes
//! are validated before anything is touched, then run under the storage
//! lock inside one transaction together with their association
//! propagation and lifecycle hooks. Any failure rolls the whole operation
//! back. Reads always go to storage.

use crate::association::Propagation;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::hooks::ChangeSet;
use crate::schema::{Attribute, AttributeSpec, Schema, RESERVED_EID};
use perfdb_storage::{Eid, FieldTest, Fields, Query, Record, StorageBackend, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// CRUD facade for one model.
///
/// Borrowed from [`Database::controller`]; cheap to create and copy.
#[derive(Debug, Clone, Copy)]
pub struct Controller<'db> {
    db: &'db Database,
    schema: &'db Schema,
}

impl<'db> Controller<'db> {
    pub(crate) fn new(db: &'db Database, schema: &'db Schema) -> Self {
        Self { db, schema }
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &'db str {
        self.schema.name()
    }

    /// Returns the model's schema.
    #[must_use]
    pub fn schema(&self) -> &'db Schema {
        self.schema
    }

    /// Returns the database this controller belongs to.
    #[must_use]
    pub fn database(&self) -> &'db Database {
        self.db
    }

    fn backend(&self) -> &'db dyn StorageBackend {
        self.db.backend()
    }

    // Reads

    /// Returns the record with this EID.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table cannot be read.
    pub fn one(&self, eid: Eid) -> CoreResult<Option<Record>> {
        Ok(self.backend().get(self.model(), &Query::eid(eid))?)
    }

    /// Returns one record matching the query.
    ///
    /// When a field query matches several records an arbitrary one is
    /// returned; use [`search`](Self::search) when uniqueness matters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the query names an undeclared
    /// attribute, or a storage error.
    pub fn one_where(&self, query: &Query) -> CoreResult<Option<Record>> {
        self.check_query(query)?;
        Ok(self.backend().get(self.model(), query)?)
    }

    /// Returns every record of the model.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table cannot be read.
    pub fn all(&self) -> CoreResult<Vec<Record>> {
        Ok(self.backend().search(self.model(), &Query::all())?)
    }

    /// Returns every record matching the query. An empty field query
    /// returns all records.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the query names an undeclared
    /// attribute, or a storage error.
    pub fn search(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.check_query(query)?;
        Ok(self.backend().search(self.model(), query)?)
    }

    /// Returns records whose `field` is `value` or a collection holding it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for an undeclared field, or a storage
    /// error.
    pub fn search_inside(&self, field: &str, value: &Value) -> CoreResult<Vec<Record>> {
        self.attribute(field)?;
        Ok(self.backend().search_inside(self.model(), field, value)?)
    }

    /// Returns records whose `field` passes `test`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for an undeclared field, or a storage
    /// error.
    pub fn match_field(&self, field: &str, test: &FieldTest) -> CoreResult<Vec<Record>> {
        self.attribute(field)?;
        Ok(self.backend().match_field(self.model(), field, test)?)
    }

    /// Returns true if any record matches the query.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the query names an undeclared
    /// attribute, or a storage error.
    pub fn exists(&self, query: &Query) -> CoreResult<bool> {
        self.check_query(query)?;
        Ok(self.backend().contains(self.model(), query)?)
    }

    /// Returns the number of records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table cannot be read.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.backend().count(self.model())?)
    }

    /// Replaces association EIDs with the records they name.
    ///
    /// With `attribute == None` every association is populated. Each
    /// embedded record carries its EID under `"eid"`; its own associations
    /// are left as EIDs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if `attribute` is not an association,
    /// [`CoreError::Referential`] for a dangling reference, or a storage
    /// error.
    pub fn populate(&self, record: &Record, attribute: Option<&str>) -> CoreResult<Record> {
        let attrs: Vec<&Attribute> = match attribute {
            Some(name) => {
                let attr = self.attribute(name)?;
                if !attr.is_association() {
                    return Err(CoreError::schema(
                        self.model(),
                        format!("{name} is not an association"),
                    ));
                }
                vec![attr]
            }
            None => self.schema.associations().collect(),
        };

        let mut out = record.clone();
        for attr in attrs {
            let (Some(value), Some(target)) = (record.get(&attr.name), attr.target()) else {
                continue;
            };
            let fetch = |eid: Eid| -> CoreResult<Value> {
                let found = self
                    .backend()
                    .get(target, &Query::eid(eid))?
                    .ok_or_else(|| CoreError::referential(self.model(), &attr.name, target, eid))?;
                Ok(embed(found))
            };
            let populated = match &attr.spec {
                AttributeSpec::ModelRef(_) => match Eid::from_value(value) {
                    Some(eid) => fetch(eid)?,
                    None => Value::Null,
                },
                AttributeSpec::CollectionRef(_) => Value::Array(
                    attr.referenced_eids(value)
                        .into_iter()
                        .map(fetch)
                        .collect::<CoreResult<_>>()?,
                ),
                AttributeSpec::Scalar(_) => continue,
            };
            out.fields.insert(attr.name.clone(), populated);
        }
        Ok(out)
    }

    /// Returns the identity digest of a record.
    ///
    /// SHA-256 over the record's hashed attributes in declaration order,
    /// hex encoded. Unset attributes hash as `null`.
    #[must_use]
    pub fn hash_digest(&self, record: &Record) -> String {
        let canonical = Value::Array(
            self.schema
                .hashed_attributes()
                .map(|attr| {
                    Value::Array(vec![
                        Value::from(attr.name.as_str()),
                        record.get(&attr.name).cloned().unwrap_or(Value::Null),
                    ])
                })
                .collect(),
        );
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    // Writes

    /// Creates a record and links it to the records it references.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Schema`] for undeclared, missing or malformed fields
    /// - [`CoreError::UniqueConstraint`] if a unique value is taken
    /// - [`CoreError::Referential`] if a referenced record does not exist
    /// - any error returned by the `on_create` hook
    ///
    /// Nothing is written when an error is returned.
    pub fn create(&self, fields: Fields) -> CoreResult<Record> {
        let fields = self.schema.validate_new(fields)?;
        self.db.transaction(|_| {
            self.check_unique(&fields, &[])?;
            self.check_references(&fields)?;

            let record = self.backend().insert(self.model(), fields)?;
            let mut propagation = Propagation::new(self.db);
            for attr in self.schema.associations() {
                if let Some(value) = record.get(&attr.name) {
                    propagation.associate(
                        self.schema,
                        attr,
                        record.eid,
                        &attr.referenced_eids(value),
                    )?;
                }
            }

            // Self-referencing associations may have touched the new record
            let eid = record.eid;
            let record = self
                .backend()
                .get(self.model(), &Query::eid(eid))?
                .unwrap_or(record);
            if let Some(hooks) = self.db.hooks_for(self.model()) {
                hooks.on_create(self, &record)?;
            }
            debug!(model = self.model(), %eid, "record created");
            Ok(record)
        })
    }

    /// Merges `fields` into every matching record and propagates the
    /// association changes.
    ///
    /// Returns the updated records.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create); a unique value may also not be given to
    /// more than one record at once.
    pub fn update(&self, fields: Fields, query: &Query) -> CoreResult<Vec<Record>> {
        self.check_query(query)?;
        let fields = self.schema.validate_partial(fields)?;
        self.db.transaction(|_| {
            let before = self.backend().search(self.model(), query)?;
            if before.is_empty() {
                return Ok(Vec::new());
            }
            let eids: Vec<Eid> = before.iter().map(|record| record.eid).collect();
            self.check_unique(&fields, &eids)?;
            self.check_references(&fields)?;

            self.backend()
                .update(self.model(), &fields, &Query::Eids(eids))?;

            let mut propagation = Propagation::new(self.db);
            for old in &before {
                for attr in self.schema.associations() {
                    if let Some(new) = fields.get(&attr.name) {
                        propagation.apply_change(
                            self.schema,
                            attr,
                            old.eid,
                            old.get(&attr.name),
                            Some(new),
                        )?;
                    }
                }
            }
            self.finish_changes(&before)
        })
    }

    /// Removes the named attributes from every matching record.
    ///
    /// Unsetting an association releases every link it held. Unsetting an
    /// attribute that is already absent is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for undeclared or required attributes,
    /// any hook error, or a storage error.
    pub fn unset(&self, field_names: &[&str], query: &Query) -> CoreResult<Vec<Record>> {
        self.check_query(query)?;
        for name in field_names {
            if self.attribute(name)?.is_required() {
                return Err(CoreError::schema(
                    self.model(),
                    format!("cannot unset required attribute {name}"),
                ));
            }
        }
        let names: Vec<String> = field_names.iter().map(|name| (*name).to_string()).collect();

        self.db.transaction(|_| {
            let before = self.backend().search(self.model(), query)?;
            if before.is_empty() {
                return Ok(Vec::new());
            }
            let eids: Vec<Eid> = before.iter().map(|record| record.eid).collect();
            self.backend()
                .unset(self.model(), &names, &Query::Eids(eids))?;

            let mut propagation = Propagation::new(self.db);
            for old in &before {
                for attr in self.schema.associations() {
                    if names.contains(&attr.name) {
                        propagation.apply_change(
                            self.schema,
                            attr,
                            old.eid,
                            old.get(&attr.name),
                            None,
                        )?;
                    }
                }
            }
            self.finish_changes(&before)
        })
    }

    /// Deletes every matching record with full propagation.
    ///
    /// Returns the deleted records as they were before deletion. Records
    /// removed by cascades are not included.
    ///
    /// # Errors
    ///
    /// Returns any `on_delete` veto, or a storage error. Either way nothing
    /// is deleted.
    pub fn delete(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.check_query(query)?;
        self.db.transaction(|_| {
            let matched = self.backend().search(self.model(), query)?;
            let mut propagation = Propagation::new(self.db);
            let mut deleted = Vec::with_capacity(matched.len());
            for record in matched {
                if let Some(record) = propagation.delete_record(self.schema, record.eid)? {
                    deleted.push(record);
                }
            }
            Ok(deleted)
        })
    }

    // Helpers

    fn attribute(&self, name: &str) -> CoreResult<&'db Attribute> {
        self.schema
            .attribute(name)
            .ok_or_else(|| CoreError::schema(self.model(), format!("unknown attribute {name}")))
    }

    fn check_query(&self, query: &Query) -> CoreResult<()> {
        if let Query::Fields { fields, .. } = query {
            for key in fields.keys() {
                self.attribute(key)?;
            }
        }
        Ok(())
    }

    /// Rejects unique values already held by records outside `updating`.
    fn check_unique(&self, fields: &Fields, updating: &[Eid]) -> CoreResult<()> {
        let mut wanted = Fields::new();
        for attr in self.schema.unique_attributes() {
            if let Some(value) = fields.get(&attr.name).filter(|v| !v.is_null()) {
                if updating.len() > 1 {
                    return Err(CoreError::unique(self.model(), &attr.name, value.clone()));
                }
                wanted.insert(attr.name.clone(), value.clone());
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let holders = self
            .backend()
            .search(self.model(), &Query::any_of(wanted.clone()))?;
        for holder in holders.iter().filter(|r| !updating.contains(&r.eid)) {
            for (name, value) in &wanted {
                if holder.get(name) == Some(value) {
                    return Err(CoreError::unique(self.model(), name, value.clone()));
                }
            }
        }
        Ok(())
    }

    /// Rejects references to records that do not exist.
    fn check_references(&self, fields: &Fields) -> CoreResult<()> {
        for attr in self.schema.associations() {
            let (Some(value), Some(target)) = (fields.get(&attr.name), attr.target()) else {
                continue;
            };
            for eid in attr.referenced_eids(value) {
                if !self.backend().contains(target, &Query::eid(eid))? {
                    return Err(CoreError::referential(self.model(), &attr.name, target, eid));
                }
            }
        }
        Ok(())
    }

    /// Re-reads changed records and runs `on_update` where they differ.
    fn finish_changes(&self, before: &[Record]) -> CoreResult<Vec<Record>> {
        let hooks = self.db.hooks_for(self.model());
        let mut after = Vec::with_capacity(before.len());
        for old in before {
            // Propagation may have cascaded the record away
            let Some(new) = self.backend().get(self.model(), &Query::eid(old.eid))? else {
                continue;
            };
            let changes = ChangeSet::diff(&old.fields, &new.fields);
            if !changes.is_empty() {
                if let Some(hooks) = hooks {
                    hooks.on_update(self, old, &new, &changes)?;
                }
                debug!(model = self.model(), eid = %new.eid, changed = changes.len(), "record updated");
            }
            after.push(new);
        }
        Ok(after)
    }
}

fn embed(record: Record) -> Value {
    let mut fields = record.fields;
    fields.insert(RESERVED_EID.to_string(), record.eid.to_value());
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::ModelHooks;
    use crate::schema::{AttributeType, SchemaRegistry};
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn registry() -> SchemaRegistry {
        let project = Schema::builder("project")
            .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
            .attribute(Attribute::collection("measurements", "measurement", "projects"))
            .build()
            .unwrap();
        let measurement = Schema::builder("measurement")
            .attribute(Attribute::scalar("name", AttributeType::String).required().hashed())
            .attribute(Attribute::scalar("trace", AttributeType::Boolean).hashed())
            .attribute(Attribute::collection("projects", "project", "measurements"))
            .build()
            .unwrap();
        let trial = Schema::builder("trial")
            .attribute(Attribute::scalar("number", AttributeType::Integer).required())
            .attribute(Attribute::model("measurement", "measurement").required())
            .build()
            .unwrap();
        SchemaRegistry::new([project, measurement, trial]).unwrap()
    }

    fn db() -> Database {
        Database::open(Config::default(), registry()).unwrap()
    }

    #[test]
    fn create_links_both_sides() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let projects = db.controller("project").unwrap();

        let m = measurements.create(fields(json!({"name": "m1"}))).unwrap();
        let p = projects
            .create(fields(json!({"name": "p1", "measurements": [m.eid]})))
            .unwrap();

        let m = measurements.one(m.eid).unwrap().unwrap();
        assert_eq!(m.eids("projects"), vec![p.eid]);
    }

    #[test]
    fn update_diffs_membership() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let projects = db.controller("project").unwrap();

        let m1 = measurements.create(fields(json!({"name": "m1"}))).unwrap();
        let m2 = measurements.create(fields(json!({"name": "m2"}))).unwrap();
        let p = projects
            .create(fields(json!({"name": "p", "measurements": [m1.eid]})))
            .unwrap();

        projects
            .update(
                fields(json!({"measurements": [m2.eid]})),
                &Query::eid(p.eid),
            )
            .unwrap();

        assert!(measurements.one(m1.eid).unwrap().unwrap().eids("projects").is_empty());
        assert_eq!(
            measurements.one(m2.eid).unwrap().unwrap().eids("projects"),
            vec![p.eid]
        );
    }

    #[test]
    fn unique_violation_leaves_table_unchanged() {
        let db = db();
        let projects = db.controller("project").unwrap();
        projects.create(fields(json!({"name": "p1"}))).unwrap();

        let err = projects.create(fields(json!({"name": "p1"}))).unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraint { ref attribute, .. } if attribute == "name"));
        assert_eq!(projects.count().unwrap(), 1);
    }

    #[test]
    fn unique_on_update() {
        let db = db();
        let projects = db.controller("project").unwrap();
        let a = projects.create(fields(json!({"name": "a"}))).unwrap();
        projects.create(fields(json!({"name": "b"}))).unwrap();

        // Re-assigning a record its own value is fine
        projects
            .update(fields(json!({"name": "a"})), &Query::eid(a.eid))
            .unwrap();
        assert!(projects
            .update(fields(json!({"name": "b"})), &Query::eid(a.eid))
            .is_err());
        assert!(projects
            .update(fields(json!({"name": "c"})), &Query::all())
            .is_err());
    }

    #[test]
    fn missing_reference_fails_before_write() {
        let db = db();
        let projects = db.controller("project").unwrap();
        let err = projects
            .create(fields(json!({"name": "p", "measurements": [99]})))
            .unwrap_err();
        assert_eq!(err.kind(), "referential");
        assert_eq!(projects.count().unwrap(), 0);
    }

    #[test]
    fn delete_cascades_required_model_ref() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let trials = db.controller("trial").unwrap();

        let m = measurements.create(fields(json!({"name": "m"}))).unwrap();
        trials
            .create(fields(json!({"number": 0, "measurement": m.eid})))
            .unwrap();
        trials
            .create(fields(json!({"number": 1, "measurement": m.eid})))
            .unwrap();

        measurements.delete(&Query::eid(m.eid)).unwrap();
        assert_eq!(trials.count().unwrap(), 0);
    }

    #[test]
    fn unset_rules() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let projects = db.controller("project").unwrap();
        let m = measurements.create(fields(json!({"name": "m", "trace": true}))).unwrap();
        let p = projects
            .create(fields(json!({"name": "p", "measurements": [m.eid]})))
            .unwrap();

        assert!(projects.unset(&["name"], &Query::eid(p.eid)).is_err());
        assert!(projects.unset(&["colour"], &Query::eid(p.eid)).is_err());

        projects.unset(&["measurements"], &Query::eid(p.eid)).unwrap();
        projects.unset(&["measurements"], &Query::eid(p.eid)).unwrap();
        assert!(!projects.one(p.eid).unwrap().unwrap().contains("measurements"));
        assert!(measurements.one(m.eid).unwrap().unwrap().eids("projects").is_empty());
    }

    #[test]
    fn populate_one_hop() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let projects = db.controller("project").unwrap();
        let m = measurements.create(fields(json!({"name": "m"}))).unwrap();
        let p = projects
            .create(fields(json!({"name": "p", "measurements": [m.eid]})))
            .unwrap();

        let populated = projects.populate(&p, None).unwrap();
        let embedded = &populated.get("measurements").unwrap()[0];
        assert_eq!(embedded["name"], "m");
        assert_eq!(embedded["eid"], json!(m.eid.as_u64()));
        // Not recursive
        assert_eq!(embedded["projects"], json!([p.eid.as_u64()]));

        assert!(projects.populate(&p, Some("name")).is_err());
    }

    #[test]
    fn digest_covers_hashed_attributes_only() {
        let db = db();
        let measurements = db.controller("measurement").unwrap();
        let a = Record::new(Eid::new(1), fields(json!({"name": "m", "trace": true})));
        let b = Record::new(
            Eid::new(2),
            fields(json!({"name": "m", "trace": true, "projects": [4]})),
        );
        let c = Record::new(Eid::new(3), fields(json!({"name": "m"})));

        let digest = measurements.hash_digest(&a);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, measurements.hash_digest(&b));
        assert_ne!(digest, measurements.hash_digest(&c));
    }

    struct Veto;

    impl ModelHooks for Veto {
        fn on_delete(&self, ctl: &Controller<'_>, record: &Record) -> CoreResult<()> {
            Err(CoreError::immutable(ctl.model(), record.eid, "in use"))
        }
    }

    #[test]
    fn hook_veto_rolls_back_propagation() {
        let db = db().with_hooks("measurement", Veto);
        let measurements = db.controller("measurement").unwrap();
        let projects = db.controller("project").unwrap();
        let m = measurements.create(fields(json!({"name": "m"}))).unwrap();
        let p = projects
            .create(fields(json!({"name": "p", "measurements": [m.eid]})))
            .unwrap();

        let err = measurements.delete(&Query::eid(m.eid)).unwrap_err();
        assert_eq!(err.kind(), "immutable_record");
        assert_eq!(measurements.count().unwrap(), 1);
        assert_eq!(
            projects.one(p.eid).unwrap().unwrap().eids("measurements"),
            vec![m.eid]
        );
    }

    #[test]
    fn search_validates_keys() {
        let db = db();
        let projects = db.controller("project").unwrap();
        assert!(projects.search(&Query::field("colour", "red")).is_err());
        assert!(projects.search(&Query::all()).unwrap().is_empty());
        assert!(projects
            .match_field("name", &FieldTest::regex("^p").unwrap())
            .unwrap()
            .is_empty());
    }
}
