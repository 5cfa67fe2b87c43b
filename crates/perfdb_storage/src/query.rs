//! Record match conditions.
//!
//! A [`Query`] selects records either by EID or by field equality. Two
//! further matching modes are exposed as separate backend operations:
//! [`FieldTest`] (regex or predicate over one field) and "collection
//! contains value" via [`contains_value`].

use crate::record::{Eid, Fields, Record};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A match condition over the records of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Exactly the record with this EID.
    Eid(Eid),
    /// Exactly the records with these EIDs. An empty list matches nothing.
    Eids(Vec<Eid>),
    /// Field equality.
    ///
    /// With `match_any == false` every pair must match (AND); otherwise one
    /// matching pair suffices (OR). An empty field map matches every record
    /// regardless of `match_any`.
    Fields {
        /// Field name to expected value.
        fields: Fields,
        /// Combine pairs with OR instead of AND.
        match_any: bool,
    },
}

impl Query {
    /// Matches every record in the table.
    #[must_use]
    pub fn all() -> Self {
        Self::Fields {
            fields: Fields::new(),
            match_any: false,
        }
    }

    /// Matches one record by EID.
    #[must_use]
    pub fn eid(eid: Eid) -> Self {
        Self::Eid(eid)
    }

    /// Matches records whose fields all equal the given values.
    #[must_use]
    pub fn all_of(fields: Fields) -> Self {
        Self::Fields {
            fields,
            match_any: false,
        }
    }

    /// Matches records where at least one field equals its given value.
    #[must_use]
    pub fn any_of(fields: Fields) -> Self {
        Self::Fields {
            fields,
            match_any: true,
        }
    }

    /// Matches records whose `field` equals `value`.
    #[must_use]
    pub fn field(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Fields::new();
        fields.insert(field.into(), value.into());
        Self::all_of(fields)
    }

    /// Returns true if this query selects every record.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::Fields { fields, .. } if fields.is_empty())
    }

    /// Returns the EIDs this query names explicitly, if it is an EID query.
    #[must_use]
    pub fn explicit_eids(&self) -> Option<Vec<Eid>> {
        match self {
            Self::Eid(eid) => Some(vec![*eid]),
            Self::Eids(eids) => Some(eids.clone()),
            Self::Fields { .. } => None,
        }
    }

    /// Evaluates the query against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.matches_parts(record.eid, &record.fields)
    }

    /// Evaluates the query against an EID and its fields.
    #[must_use]
    pub fn matches_parts(&self, eid: Eid, fields: &Fields) -> bool {
        match self {
            Self::Eid(target) => *target == eid,
            Self::Eids(targets) => targets.contains(&eid),
            Self::Fields {
                fields: expected,
                match_any,
            } => {
                if expected.is_empty() {
                    return true;
                }
                let mut pairs = expected
                    .iter()
                    .map(|(key, value)| fields.get(key) == Some(value));
                if *match_any {
                    pairs.any(|hit| hit)
                } else {
                    pairs.all(|hit| hit)
                }
            }
        }
    }
}

impl From<Eid> for Query {
    fn from(eid: Eid) -> Self {
        Self::Eid(eid)
    }
}

/// Test applied to a single field by `match_field`.
#[derive(Clone)]
pub enum FieldTest {
    /// The field is set to any value.
    Any,
    /// The field's string representation matches the regex.
    Regex(Regex),
    /// The predicate returns true for the field's value.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl FieldTest {
    /// Builds a regex test.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// Builds a predicate test.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Applies the test to a field value. `None` means the field is unset.
    #[must_use]
    pub fn test(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Any => true,
            Self::Regex(regex) => match value {
                Value::String(s) => regex.is_match(s),
                other => regex.is_match(&other.to_string()),
            },
            Self::Predicate(predicate) => predicate(value),
        }
    }
}

impl fmt::Debug for FieldTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Regex(regex) => write!(f, "Regex({:?})", regex.as_str()),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Returns true if `field_value` is `value` or an array containing `value`.
#[must_use]
pub fn contains_value(field_value: &Value, value: &Value) -> bool {
    if field_value == value {
        return true;
    }
    match field_value {
        Value::Array(items) => items.iter().any(|item| item == value),
        _ => false,
    }
}
