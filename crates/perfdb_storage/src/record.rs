//! Records and element identifiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Field map of a record: attribute name to JSON value.
pub type Fields = serde_json::Map<String, Value>;

/// Element identifier of a record.
///
/// EIDs are assigned by the backend on insert, are unique within a table
/// and are never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(pub u64);

impl Eid {
    /// Creates an EID from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reads an EID out of a JSON value.
    ///
    /// Accepts non-negative integers only.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_u64().map(Self)
    }

    /// Returns the EID as a JSON value.
    #[must_use]
    pub fn to_value(self) -> Value {
        Value::from(self.0)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Eid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl From<u64> for Eid {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A stored document: its EID plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Element identifier.
    pub eid: Eid,
    /// Attribute values.
    pub fields: Fields,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(eid: Eid, fields: Fields) -> Self {
        Self { eid, fields }
    }

    /// Returns the value of a field, if set.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns true if the field is set (even to `null`).
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns the field as a string slice, if it is a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Returns the EIDs held by an association field.
    ///
    /// A single EID yields one element, an array yields its integer
    /// elements, anything else (including an unset field) yields nothing.
    #[must_use]
    pub fn eids(&self, field: &str) -> Vec<Eid> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Eid::from_value).collect(),
            Some(value) => Eid::from_value(value).into_iter().collect(),
            None => Vec::new(),
        }
    }
}
