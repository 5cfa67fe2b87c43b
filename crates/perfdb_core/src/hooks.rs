//! Lifecycle hooks.

use crate::controller::Controller;
use crate::error::CoreResult;
use perfdb_storage::{Fields, Record, Value};
use std::collections::BTreeMap;

/// Old and new value of one attribute. `None` means unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Value before the operation.
    pub old: Option<Value>,
    /// Value after the operation.
    pub new: Option<Value>,
}

/// Attributes that differ between two versions of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<String, Change>,
}

impl ChangeSet {
    /// Compares two field maps.
    #[must_use]
    pub fn diff(before: &Fields, after: &Fields) -> Self {
        let mut changes = BTreeMap::new();
        for (key, old) in before {
            let new = after.get(key);
            if new != Some(old) {
                changes.insert(
                    key.clone(),
                    Change {
                        old: Some(old.clone()),
                        new: new.cloned(),
                    },
                );
            }
        }
        for (key, new) in after {
            if !before.contains_key(key) {
                changes.insert(
                    key.clone(),
                    Change {
                        old: None,
                        new: Some(new.clone()),
                    },
                );
            }
        }
        Self { changes }
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of changed attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns the change to one attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&Change> {
        self.changes.get(attribute)
    }

    /// Returns true if the attribute changed.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.changes.contains_key(attribute)
    }

    /// Iterates over changes in attribute name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Per-model callbacks run inside the controller's transaction.
///
/// Returning an error (typically [`CoreError::ImmutableRecord`]) vetoes the
/// operation and rolls back everything it did, including propagation.
///
/// [`CoreError::ImmutableRecord`]: crate::CoreError::ImmutableRecord
///
/// # Example
///
/// ```rust
/// use perfdb_core::{ChangeSet, Controller, CoreError, CoreResult, ModelHooks};
/// use perfdb_storage::Record;
///
/// struct Frozen;
///
/// impl ModelHooks for Frozen {
///     fn on_update(
///         &self,
///         ctl: &Controller<'_>,
///         before: &Record,
///         _after: &Record,
///         changes: &ChangeSet,
///     ) -> CoreResult<()> {
///         if changes.contains("name") {
///             return Err(CoreError::immutable(ctl.model(), before.eid, "name is frozen"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait ModelHooks: Send + Sync {
    /// Called after a record and its associations have been written.
    fn on_create(&self, ctl: &Controller<'_>, record: &Record) -> CoreResult<()> {
        let _ = (ctl, record);
        Ok(())
    }

    /// Called after a record changed, with its versions and the difference.
    ///
    /// Not called when the operation left the record unchanged.
    fn on_update(
        &self,
        ctl: &Controller<'_>,
        before: &Record,
        after: &Record,
        changes: &ChangeSet,
    ) -> CoreResult<()> {
        let _ = (ctl, before, after, changes);
        Ok(())
    }

    /// Called before a record is removed, while it still exists.
    fn on_delete(&self, ctl: &Controller<'_>, record: &Record) -> CoreResult<()> {
        let _ = (ctl, record);
        Ok(())
    }
}
