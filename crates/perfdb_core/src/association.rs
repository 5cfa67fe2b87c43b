//! Association propagation.
//!
//! Keeps both ends of a two-way association consistent. For an attribute
//! `A.attr` targeting model `B` through `B.via`:
//!
//! - associate: each target `b` gets the source EID in `b.via`. A model
//!   reference is overwritten (last writer wins), a collection gains the
//!   EID once.
//! - disassociate: the source EID is dropped from `b.via`. When `b.via`
//!   is required and nothing is left, `b` is deleted in turn.
//!
//! Deletion walks the record's own associations first, then every
//! association elsewhere that still names the record, then removes it.
//! Each pass carries the set of records already being deleted so cascades
//! terminate on cycles.

use crate::controller::Controller;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::schema::{Attribute, AttributeSpec, Schema};
use perfdb_storage::{Eid, Fields, Query, Record, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One propagation pass, scoped to a single controller operation.
pub(crate) struct Propagation<'db> {
    db: &'db Database,
    deleting: HashSet<(String, Eid)>,
}

impl<'db> Propagation<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            deleting: HashSet::new(),
        }
    }

    /// Propagates a before/after change of one association attribute.
    ///
    /// Only targets whose membership actually changed are touched; removed
    /// links are released before added ones are made.
    pub(crate) fn apply_change(
        &mut self,
        source: &Schema,
        attr: &'db Attribute,
        source_eid: Eid,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> CoreResult<()> {
        let old_eids = old.map(|v| attr.referenced_eids(v)).unwrap_or_default();
        let new_eids = new.map(|v| attr.referenced_eids(v)).unwrap_or_default();

        let removed: Vec<Eid> = old_eids
            .iter()
            .filter(|eid| !new_eids.contains(eid))
            .copied()
            .collect();
        let added: Vec<Eid> = new_eids
            .iter()
            .filter(|eid| !old_eids.contains(eid))
            .copied()
            .collect();

        if !removed.is_empty() {
            self.disassociate(source, attr, source_eid, &removed)?;
        }
        if !added.is_empty() {
            self.associate(source, attr, source_eid, &added)?;
        }
        Ok(())
    }

    /// Points every target's back-reference at `source_eid`.
    pub(crate) fn associate(
        &mut self,
        source: &Schema,
        attr: &Attribute,
        source_eid: Eid,
        targets: &[Eid],
    ) -> CoreResult<()> {
        let Some(target_model) = attr.target() else {
            return Ok(());
        };
        let backend = self.db.backend();
        let via = self
            .db
            .registry()
            .via_attribute(source.name(), attr)
            .map(|(_, via)| via);

        for &eid in targets {
            let Some(target) = backend.get(target_model, &Query::eid(eid))? else {
                return Err(CoreError::referential(
                    source.name(),
                    &attr.name,
                    target_model,
                    eid,
                ));
            };
            let Some(via) = via else {
                continue;
            };

            let value = match &via.spec {
                AttributeSpec::ModelRef(_) => {
                    let current = target.get(&via.name).and_then(Eid::from_value);
                    if current == Some(source_eid) {
                        continue;
                    }
                    if let Some(previous) = current {
                        warn!(
                            model = target_model,
                            eid = %eid,
                            attribute = %via.name,
                            %previous,
                            replacement = %source_eid,
                            "overwriting single-valued back-reference"
                        );
                    }
                    source_eid.to_value()
                }
                AttributeSpec::CollectionRef(_) => {
                    let mut eids = target.eids(&via.name);
                    if eids.contains(&source_eid) {
                        continue;
                    }
                    eids.push(source_eid);
                    eid_array(&eids)
                }
                AttributeSpec::Scalar(_) => continue,
            };

            backend.update(target_model, &single(&via.name, value), &Query::eid(eid))?;
            debug!(
                source = source.name(),
                %source_eid,
                target = target_model,
                %eid,
                via = %via.name,
                "associated"
            );
        }
        Ok(())
    }

    /// Removes `source_eid` from every target's back-reference.
    pub(crate) fn disassociate(
        &mut self,
        source: &Schema,
        attr: &Attribute,
        source_eid: Eid,
        targets: &[Eid],
    ) -> CoreResult<()> {
        let db = self.db;
        let Some((holder, via)) = db.registry().via_attribute(source.name(), attr) else {
            return Ok(());
        };
        for &eid in targets {
            self.release(holder, via, eid, source_eid)?;
        }
        Ok(())
    }

    /// Drops `released` from `holder.attr` of record `eid`.
    ///
    /// Deletes the record instead when the attribute is required and would
    /// be left empty.
    fn release(
        &mut self,
        holder: &'db Schema,
        attr: &'db Attribute,
        eid: Eid,
        released: Eid,
    ) -> CoreResult<()> {
        if self.is_deleting(holder.name(), eid) {
            return Ok(());
        }
        let backend = self.db.backend();
        let Some(record) = backend.get(holder.name(), &Query::eid(eid))? else {
            return Ok(());
        };

        match &attr.spec {
            AttributeSpec::ModelRef(spec) => {
                // Overwritten back-references belong to someone else now
                if record.get(&attr.name).and_then(Eid::from_value) != Some(released) {
                    return Ok(());
                }
                if spec.required {
                    debug!(model = holder.name(), %eid, attribute = %attr.name, "cascading delete");
                    self.delete_record(holder, eid)?;
                } else {
                    backend.unset(holder.name(), &[attr.name.clone()], &Query::eid(eid))?;
                }
            }
            AttributeSpec::CollectionRef(spec) => {
                let mut eids = record.eids(&attr.name);
                let before = eids.len();
                eids.retain(|e| *e != released);
                if eids.len() == before {
                    return Ok(());
                }
                if spec.required && eids.is_empty() {
                    debug!(model = holder.name(), %eid, attribute = %attr.name, "cascading delete");
                    self.delete_record(holder, eid)?;
                } else {
                    backend.update(
                        holder.name(),
                        &single(&attr.name, eid_array(&eids)),
                        &Query::eid(eid),
                    )?;
                }
            }
            AttributeSpec::Scalar(_) => {}
        }
        Ok(())
    }

    /// Deletes one record with full propagation.
    ///
    /// Returns `None` if the record is missing or already being deleted in
    /// this pass.
    pub(crate) fn delete_record(
        &mut self,
        schema: &'db Schema,
        eid: Eid,
    ) -> CoreResult<Option<Record>> {
        if self.is_deleting(schema.name(), eid) {
            return Ok(None);
        }
        let db = self.db;
        let Some(record) = db.backend().get(schema.name(), &Query::eid(eid))? else {
            return Ok(None);
        };
        self.deleting.insert((schema.name().to_string(), eid));

        if let Some(hooks) = db.hooks_for(schema.name()) {
            hooks.on_delete(&Controller::new(db, schema), &record)?;
        }

        for attr in schema.associations() {
            if let Some(value) = record.get(&attr.name) {
                self.disassociate(schema, attr, eid, &attr.referenced_eids(value))?;
            }
        }

        let eid_value = eid.to_value();
        for back in db.registry().back_references(schema.name()) {
            let holder = db.registry().schema(&back.model)?;
            let Some(attr) = holder.attribute(&back.attribute) else {
                continue;
            };
            for other in db
                .backend()
                .search_inside(&back.model, &back.attribute, &eid_value)?
            {
                self.release(holder, attr, other.eid, eid)?;
            }
        }

        db.backend().remove(schema.name(), &Query::eid(eid))?;
        debug!(model = schema.name(), %eid, "record deleted");
        Ok(Some(record))
    }

    fn is_deleting(&self, model: &str, eid: Eid) -> bool {
        self.deleting.contains(&(model.to_string(), eid))
    }
}

fn single(name: &str, value: Value) -> Fields {
    let mut fields = Fields::new();
    fields.insert(name.to_string(), value);
    fields
}

fn eid_array(eids: &[Eid]) -> Value {
    Value::Array(eids.iter().map(|eid| eid.to_value()).collect())
}
