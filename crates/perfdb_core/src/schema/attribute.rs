//! Attribute declarations and value validation.

use crate::error::{CoreError, CoreResult};
use perfdb_storage::{Eid, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type of a scalar attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// UTF-8 string.
    String,
    /// Signed or unsigned 64-bit integer.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// JSON array of any values.
    Array,
    /// RFC 3339 timestamp string.
    Datetime,
}

impl AttributeType {
    /// Returns true if `value` has this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Datetime => value
                .as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// A plain value attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarSpec {
    /// Value type.
    #[serde(rename = "type")]
    pub ty: AttributeType,
    /// Must be present on every record.
    #[serde(default)]
    pub required: bool,
    /// At most one record per model may hold a given value.
    #[serde(default)]
    pub unique: bool,
    /// Value filled in when a required attribute is omitted on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A single-valued reference to a record of another model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRefSpec {
    /// Referenced model.
    pub target: String,
    /// Attribute on `target` that points back, if the link is two-way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    /// Must be present on every record.
    #[serde(default)]
    pub required: bool,
}

/// A set of references to records of another model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRefSpec {
    /// Referenced model.
    pub target: String,
    /// Attribute on `target` that points back.
    pub via: String,
    /// Must be present and non-empty on every record.
    #[serde(default)]
    pub required: bool,
}

/// Shape of an attribute, resolved once when the schema is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeSpec {
    /// Plain value.
    Scalar(ScalarSpec),
    /// Single reference.
    ModelRef(ModelRefSpec),
    /// Reference set.
    CollectionRef(CollectionRefSpec),
}

/// One declared attribute of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute shape.
    #[serde(flatten)]
    pub spec: AttributeSpec,
    /// Contributes to the record's identity digest.
    #[serde(default)]
    pub hashed: bool,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attribute {
    fn with_spec(name: impl Into<String>, spec: AttributeSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            hashed: false,
            description: None,
        }
    }

    /// Declares an optional scalar attribute.
    #[must_use]
    pub fn scalar(name: impl Into<String>, ty: AttributeType) -> Self {
        Self::with_spec(
            name,
            AttributeSpec::Scalar(ScalarSpec {
                ty,
                required: false,
                unique: false,
                default: None,
            }),
        )
    }

    /// Declares an optional one-way model reference.
    #[must_use]
    pub fn model(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_spec(
            name,
            AttributeSpec::ModelRef(ModelRefSpec {
                target: target.into(),
                via: None,
                required: false,
            }),
        )
    }

    /// Declares an optional collection reference.
    #[must_use]
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self::with_spec(
            name,
            AttributeSpec::CollectionRef(CollectionRefSpec {
                target: target.into(),
                via: via.into(),
                required: false,
            }),
        )
    }

    /// Marks the attribute required.
    #[must_use]
    pub fn required(mut self) -> Self {
        match &mut self.spec {
            AttributeSpec::Scalar(spec) => spec.required = true,
            AttributeSpec::ModelRef(spec) => spec.required = true,
            AttributeSpec::CollectionRef(spec) => spec.required = true,
        }
        self
    }

    /// Marks a scalar attribute unique. No effect on references.
    #[must_use]
    pub fn unique(mut self) -> Self {
        if let AttributeSpec::Scalar(spec) = &mut self.spec {
            spec.unique = true;
        }
        self
    }

    /// Sets the default of a scalar attribute. No effect on references.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let AttributeSpec::Scalar(spec) = &mut self.spec {
            spec.default = Some(value.into());
        }
        self
    }

    /// Names the back-reference of a model reference. No effect otherwise.
    #[must_use]
    pub fn via(mut self, via: impl Into<String>) -> Self {
        if let AttributeSpec::ModelRef(spec) = &mut self.spec {
            spec.via = Some(via.into());
        }
        self
    }

    /// Includes the attribute in the identity digest.
    #[must_use]
    pub fn hashed(mut self) -> Self {
        self.hashed = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Returns true if the attribute must be present.
    #[must_use]
    pub fn is_required(&self) -> bool {
        match &self.spec {
            AttributeSpec::Scalar(spec) => spec.required,
            AttributeSpec::ModelRef(spec) => spec.required,
            AttributeSpec::CollectionRef(spec) => spec.required,
        }
    }

    /// Returns true if the attribute is a unique scalar.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        matches!(&self.spec, AttributeSpec::Scalar(spec) if spec.unique)
    }

    /// Returns the declared default of a scalar attribute.
    #[must_use]
    pub fn declared_default(&self) -> Option<&Value> {
        match &self.spec {
            AttributeSpec::Scalar(spec) => spec.default.as_ref(),
            _ => None,
        }
    }

    /// Returns true for model and collection references.
    #[must_use]
    pub fn is_association(&self) -> bool {
        !matches!(self.spec, AttributeSpec::Scalar(_))
    }

    /// Returns the referenced model of an association.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.spec {
            AttributeSpec::Scalar(_) => None,
            AttributeSpec::ModelRef(spec) => Some(&spec.target),
            AttributeSpec::CollectionRef(spec) => Some(&spec.target),
        }
    }

    /// Returns the back-reference attribute of a two-way association.
    #[must_use]
    pub fn via_name(&self) -> Option<&str> {
        match &self.spec {
            AttributeSpec::Scalar(_) => None,
            AttributeSpec::ModelRef(spec) => spec.via.as_deref(),
            AttributeSpec::CollectionRef(spec) => Some(&spec.via),
        }
    }

    /// Returns the EIDs an association value refers to.
    ///
    /// `null` and scalar attributes yield nothing.
    #[must_use]
    pub fn referenced_eids(&self, value: &Value) -> Vec<Eid> {
        match (&self.spec, value) {
            (AttributeSpec::Scalar(_), _) => Vec::new(),
            (_, Value::Array(items)) => items.iter().filter_map(Eid::from_value).collect(),
            (_, other) => Eid::from_value(other).into_iter().collect(),
        }
    }

    /// Checks a value against the declaration and returns it normalized.
    ///
    /// Collection references are deduplicated, keeping first occurrences.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the value has the wrong shape.
    pub fn validate(&self, model: &str, value: Value) -> CoreResult<Value> {
        let mismatch = |expected: &str, value: &Value| {
            CoreError::schema(
                model,
                format!("{} expects {expected}, got {value}", self.name),
            )
        };

        match &self.spec {
            AttributeSpec::Scalar(spec) => {
                if value.is_null() && !spec.required {
                    return Ok(value);
                }
                if spec.ty.accepts(&value) {
                    Ok(value)
                } else {
                    Err(mismatch(&spec.ty.to_string(), &value))
                }
            }
            AttributeSpec::ModelRef(spec) => {
                if value.is_null() && !spec.required {
                    return Ok(value);
                }
                if Eid::from_value(&value).is_some() {
                    Ok(value)
                } else {
                    Err(mismatch(&format!("a {} EID", spec.target), &value))
                }
            }
            AttributeSpec::CollectionRef(spec) => {
                let Value::Array(items) = &value else {
                    return Err(mismatch(&format!("a list of {} EIDs", spec.target), &value));
                };
                let mut eids: Vec<Eid> = Vec::with_capacity(items.len());
                for item in items {
                    let eid = Eid::from_value(item)
                        .ok_or_else(|| mismatch(&format!("a list of {} EIDs", spec.target), &value))?;
                    if !eids.contains(&eid) {
                        eids.push(eid);
                    }
                }
                if spec.required && eids.is_empty() {
                    return Err(CoreError::schema(
                        model,
                        format!("{} is required and may not be empty", self.name),
                    ));
                }
                Ok(Value::Array(eids.into_iter().map(Eid::to_value).collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_types() {
        assert!(AttributeType::Integer.accepts(&json!(-3)));
        assert!(AttributeType::Integer.accepts(&json!(u64::MAX)));
        assert!(!AttributeType::Integer.accepts(&json!(1.5)));
        assert!(AttributeType::Datetime.accepts(&json!("2024-03-01T12:00:00Z")));
        assert!(!AttributeType::Datetime.accepts(&json!("yesterday")));
        assert!(AttributeType::Array.accepts(&json!([])));
    }

    #[test]
    fn null_only_for_optional() {
        let optional = Attribute::scalar("cc", AttributeType::String);
        assert_eq!(optional.validate("target", Value::Null).unwrap(), Value::Null);

        let required = Attribute::scalar("cc", AttributeType::String).required();
        assert!(required.validate("target", Value::Null).is_err());

        let reference = Attribute::model("target", "target");
        assert!(reference.validate("experiment", Value::Null).is_ok());
        assert!(reference.validate("experiment", json!("3")).is_err());
    }

    #[test]
    fn collections_are_deduplicated() {
        let attr = Attribute::collection("measurements", "measurement", "projects");
        let value = attr.validate("project", json!([3, 1, 3, 2, 1])).unwrap();
        assert_eq!(value, json!([3, 1, 2]));

        assert!(attr.validate("project", json!([1, "x"])).is_err());
        assert!(attr.validate("project", json!(1)).is_err());

        let required = attr.required();
        assert!(required.validate("project", json!([])).is_err());
    }

    #[test]
    fn referenced_eids() {
        let single = Attribute::model("target", "target");
        assert_eq!(single.referenced_eids(&json!(4)), vec![Eid::new(4)]);
        assert!(single.referenced_eids(&Value::Null).is_empty());

        let many = Attribute::collection("projects", "project", "measurements");
        assert_eq!(
            many.referenced_eids(&json!([1, 2])),
            vec![Eid::new(1), Eid::new(2)]
        );
    }

    #[test]
    fn serde_layout() {
        let attr = Attribute::collection("measurements", "measurement", "projects")
            .required()
            .description("Measurements in this project");
        let value = serde_json::to_value(&attr).unwrap();
        assert_eq!(value["kind"], "collection_ref");
        assert_eq!(value["via"], "projects");

        let parsed: Attribute = serde_json::from_value(json!({
            "name": "name",
            "kind": "scalar",
            "type": "string",
            "unique": true
        }))
        .unwrap();
        assert!(parsed.is_unique());
        assert!(!parsed.is_required());
    }
}
