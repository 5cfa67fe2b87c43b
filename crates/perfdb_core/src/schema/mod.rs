//! Model schemas.
//!
//! A [`Schema`] declares the attributes of one model (table). Schemas are
//! collected into a [`SchemaRegistry`], which checks that every association
//! points at a declared model and that two-way associations agree on both
//! ends.

mod attribute;
mod registry;

pub use attribute::{
    Attribute, AttributeSpec, AttributeType, CollectionRefSpec, ModelRefSpec, ScalarSpec,
};
pub use registry::{BackReference, SchemaRegistry};

use crate::error::{CoreError, CoreResult};
use perfdb_storage::Fields;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field name reserved for the record identifier.
pub const RESERVED_EID: &str = "eid";

/// Attribute declarations of one model, in declaration order.
///
/// # Example
///
/// ```rust
/// use perfdb_core::{Attribute, AttributeType, Schema};
///
/// let schema = Schema::builder("project")
///     .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
///     .attribute(Attribute::collection("measurements", "measurement", "projects"))
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.name(), "project");
/// assert!(schema.attribute("measurements").unwrap().is_association());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct Schema {
    name: String,
    attributes: Vec<Attribute>,
}

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    name: String,
    attributes: Vec<Attribute>,
}

impl TryFrom<SchemaDef> for Schema {
    type Error = CoreError;

    fn try_from(def: SchemaDef) -> CoreResult<Self> {
        Self::new(def.name, def.attributes)
    }
}

impl From<Schema> for SchemaDef {
    fn from(schema: Schema) -> Self {
        Self {
            name: schema.name,
            attributes: schema.attributes,
        }
    }
}

impl Schema {
    /// Starts building a schema for `model`.
    #[must_use]
    pub fn builder(model: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: model.into(),
            attributes: Vec::new(),
        }
    }

    /// Creates a schema from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if the model name is empty, an
    /// attribute name is empty, repeated or reserved, or a default does not
    /// match its attribute's type.
    pub fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_schema("model name may not be empty"));
        }

        let mut seen = HashSet::new();
        for attr in &attributes {
            if attr.name.is_empty() || attr.name == RESERVED_EID {
                return Err(CoreError::invalid_schema(format!(
                    "{name}: attribute name {:?} is not allowed",
                    attr.name
                )));
            }
            if !seen.insert(attr.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "{name}: attribute {:?} declared twice",
                    attr.name
                )));
            }
            if let AttributeSpec::Scalar(spec) = &attr.spec {
                if let Some(default) = &spec.default {
                    if !spec.ty.accepts(default) {
                        return Err(CoreError::invalid_schema(format!(
                            "{name}.{}: default {default} is not a {}",
                            attr.name, spec.ty
                        )));
                    }
                }
            }
        }

        Ok(Self { name, attributes })
    }

    /// Returns the model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Looks up one attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Iterates over model and collection references.
    pub fn associations(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|attr| attr.is_association())
    }

    /// Iterates over unique attributes.
    pub fn unique_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|attr| attr.is_unique())
    }

    /// Iterates over attributes included in the identity digest.
    pub fn hashed_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|attr| attr.hashed)
    }

    /// Validates the fields of a new record.
    ///
    /// Every key must be declared and every value well-formed. Omitted
    /// required attributes are filled from their default or rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] on the first violation found.
    pub fn validate_new(&self, fields: Fields) -> CoreResult<Fields> {
        let mut out = self.validate_partial(fields)?;
        for attr in &self.attributes {
            if !attr.is_required() || out.contains_key(&attr.name) {
                continue;
            }
            match attr.declared_default() {
                Some(default) => {
                    out.insert(attr.name.clone(), default.clone());
                }
                None => {
                    return Err(CoreError::schema(
                        &self.name,
                        format!("missing required attribute {}", attr.name),
                    ))
                }
            }
        }
        Ok(out)
    }

    /// Validates fields merged into existing records.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for undeclared keys or malformed values.
    pub fn validate_partial(&self, fields: Fields) -> CoreResult<Fields> {
        let mut out = Fields::new();
        for (key, value) in fields {
            let attr = self.attribute(&key).ok_or_else(|| {
                CoreError::schema(&self.name, format!("unknown attribute {key}"))
            })?;
            let value = attr.validate(&self.name, value)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    attributes: Vec<Attribute>,
}

impl SchemaBuilder {
    /// Appends an attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Builds the schema.
    ///
    /// # Errors
    ///
    /// See [`Schema::new`].
    pub fn build(self) -> CoreResult<Schema> {
        Schema::new(self.name, self.attributes)
    }
}
