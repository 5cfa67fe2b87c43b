//! Registry of all known model schemas.

use super::{Attribute, Schema};
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// An association attribute that points at a given model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackReference {
    /// Model holding the association.
    pub model: String,
    /// The association attribute.
    pub attribute: String,
}

/// Every schema the database knows, checked for closure.
///
/// Built once at startup and shared by every controller. Besides name
/// lookups it holds the reverse-reference table: for each model, the
/// association attributes of any model that point at it.
///
/// A two-way link only has to be declared on one side. When a collection
/// names a model reference as its `via` and the reference declares no
/// `via` of its own, the reference is paired back with the collection.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
    back_refs: BTreeMap<String, Vec<BackReference>>,
    // model -> attribute -> back-reference attribute on the target
    vias: BTreeMap<String, BTreeMap<String, String>>,
}

impl SchemaRegistry {
    /// Builds a registry from a set of schemas.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if:
    /// - two schemas share a name
    /// - an association targets an unknown model
    /// - a `via` attribute is missing on the target, is not an association
    ///   back to the source model, or names a different back-reference
    /// - two attributes claim the same undeclared back-reference
    pub fn new(schemas: impl IntoIterator<Item = Schema>) -> CoreResult<Self> {
        let mut map = BTreeMap::new();
        for schema in schemas {
            let name = schema.name().to_string();
            if map.insert(name.clone(), schema).is_some() {
                return Err(CoreError::invalid_schema(format!(
                    "model {name} declared twice"
                )));
            }
        }

        let mut back_refs: BTreeMap<String, Vec<BackReference>> = BTreeMap::new();
        let mut vias: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut inferred: BTreeMap<(String, String), String> = BTreeMap::new();
        for schema in map.values() {
            for attr in schema.associations() {
                let Some(target_name) = attr.target() else {
                    continue;
                };
                let target = map.get(target_name).ok_or_else(|| {
                    CoreError::invalid_schema(format!(
                        "{}.{} targets unknown model {target_name}",
                        schema.name(),
                        attr.name
                    ))
                })?;
                if let Some(via) = attr.via_name() {
                    let back = check_pairing(schema, attr, target, via)?;
                    vias.entry(schema.name().to_string())
                        .or_default()
                        .insert(attr.name.clone(), via.to_string());
                    if back.via_name().is_none() {
                        let key = (target_name.to_string(), via.to_string());
                        if let Some(other) = inferred.insert(key, attr.name.clone()) {
                            return Err(CoreError::invalid_schema(format!(
                                "{target_name}.{via} is the via of both {}.{other} and {}.{}",
                                schema.name(),
                                schema.name(),
                                attr.name
                            )));
                        }
                    }
                }
                back_refs
                    .entry(target_name.to_string())
                    .or_default()
                    .push(BackReference {
                        model: schema.name().to_string(),
                        attribute: attr.name.clone(),
                    });
            }
        }

        for ((model, attribute), via) in inferred {
            vias.entry(model).or_default().insert(attribute, via);
        }

        Ok(Self {
            schemas: map,
            back_refs,
            vias,
        })
    }

    /// Looks up a schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] if no such model is registered.
    pub fn schema(&self, model: &str) -> CoreResult<&Schema> {
        self.schemas
            .get(model)
            .ok_or_else(|| CoreError::unknown_model(model))
    }

    /// Looks up a schema, returning `None` if it is not registered.
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&Schema> {
        self.schemas.get(model)
    }

    /// Returns the association attributes that point at `model`.
    #[must_use]
    pub fn back_references(&self, model: &str) -> &[BackReference] {
        self.back_refs.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over registered model names in sorted order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Iterates over registered schemas in model name order.
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// Returns the name of the attribute on the target that points back at
    /// `model.attribute`, whether declared or inferred.
    ///
    /// `None` for one-way references and scalars.
    #[must_use]
    pub fn via_name(&self, model: &str, attribute: &str) -> Option<&str> {
        self.vias
            .get(model)?
            .get(attribute)
            .map(String::as_str)
    }

    /// Returns the back-reference attribute of a two-way association
    /// declared on `model`.
    ///
    /// `None` for one-way references and scalars.
    #[must_use]
    pub fn via_attribute(&self, model: &str, attr: &Attribute) -> Option<(&Schema, &Attribute)> {
        let target = self.schemas.get(attr.target()?)?;
        let via = target.attribute(self.via_name(model, &attr.name)?)?;
        Some((target, via))
    }
}

/// Checks that `target.via` points back at `source` and returns it.
fn check_pairing<'a>(
    source: &Schema,
    attr: &Attribute,
    target: &'a Schema,
    via: &str,
) -> CoreResult<&'a Attribute> {
    let site = format!("{}.{}", source.name(), attr.name);
    let back = target.attribute(via).ok_or_else(|| {
        CoreError::invalid_schema(format!(
            "{site}: via attribute {}.{via} does not exist",
            target.name()
        ))
    })?;
    if back.target() != Some(source.name()) {
        return Err(CoreError::invalid_schema(format!(
            "{site}: {}.{via} must reference {}",
            target.name(),
            source.name()
        )));
    }
    match back.via_name() {
        Some(name) if name != attr.name => Err(CoreError::invalid_schema(format!(
            "{site}: {}.{via} must name {} as its via",
            target.name(),
            attr.name
        ))),
        _ => Ok(back),
    }
}
