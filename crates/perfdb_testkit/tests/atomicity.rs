//! Failed controller operations leave storage exactly as it was.

use perfdb_core::{ChangeSet, Controller, CoreError, CoreResult, ModelHooks, Query, Record};
use perfdb_testkit::prelude::*;
use serde_json::json;

/// Refuses to delete the trial with the given number.
struct PinnedTrial(u64);

impl ModelHooks for PinnedTrial {
    fn on_delete(&self, ctl: &Controller<'_>, record: &Record) -> CoreResult<()> {
        if record.get("number") == Some(&json!(self.0)) {
            return Err(CoreError::immutable(
                ctl.model(),
                record.eid,
                "trial is referenced by a published report",
            ));
        }
        Ok(())
    }
}

/// Rejects every project creation after propagation has run.
struct FrozenProjects;

impl ModelHooks for FrozenProjects {
    fn on_create(&self, ctl: &Controller<'_>, record: &Record) -> CoreResult<()> {
        Err(CoreError::immutable(ctl.model(), record.eid, "projects are frozen"))
    }
}

/// Rejects renames.
struct NoRenames;

impl ModelHooks for NoRenames {
    fn on_update(
        &self,
        ctl: &Controller<'_>,
        _before: &Record,
        after: &Record,
        changes: &ChangeSet,
    ) -> CoreResult<()> {
        if changes.contains("name") {
            return Err(CoreError::immutable(ctl.model(), after.eid, "renaming is not allowed"));
        }
        Ok(())
    }
}

#[test]
fn veto_in_the_middle_of_a_cascade_rolls_everything_back() {
    for choice in BackendChoice::ALL {
        let test_db =
            TestDatabase::open(choice, hpc_registry()).with_hooks("trial", PinnedTrial(1));
        let ids = scenarios::seeded_experiment(&test_db, "a", 3);
        let before = snapshot(test_db.backend());

        // Cascade: project -> experiment -> trial 0 (deleted) -> trial 1 (vetoed)
        let err = test_db
            .controller("project")
            .unwrap()
            .delete(&Query::eid(ids.project))
            .unwrap_err();
        assert_eq!(err.kind(), "immutable_record", "{choice}");

        assert_eq!(snapshot(test_db.backend()), before, "{choice}");
        assert_eq!(test_db.backend().transaction_depth(), 0, "{choice}");
        assert_integrity(&test_db);
    }
}

#[test]
fn failing_create_hook_undoes_propagation() {
    for choice in BackendChoice::ALL {
        let test_db = TestDatabase::open(choice, hpc_registry()).with_hooks("project", FrozenProjects);
        let m = test_db
            .controller("measurement")
            .unwrap()
            .create(obj(json!({"name": "m1"})))
            .unwrap();
        let before = snapshot(test_db.backend());

        let projects = test_db.controller("project").unwrap();
        let err = projects
            .create(obj(json!({"name": "p1", "measurements": [m.eid]})))
            .unwrap_err();
        assert!(matches!(err, CoreError::ImmutableRecord { .. }), "{choice}");

        assert_eq!(projects.count().unwrap(), 0, "{choice}");
        assert_eq!(snapshot(test_db.backend()), before, "{choice}");
    }
}

#[test]
fn failing_update_hook_undoes_write_and_propagation() {
    for choice in BackendChoice::ALL {
        let test_db = TestDatabase::open(choice, hpc_registry()).with_hooks("project", NoRenames);
        let measurements = test_db.controller("measurement").unwrap();
        let m1 = measurements.create(obj(json!({"name": "m1"}))).unwrap();
        let m2 = measurements.create(obj(json!({"name": "m2"}))).unwrap();
        let projects = test_db.controller("project").unwrap();
        let p = projects
            .create(obj(json!({"name": "p", "measurements": [m1.eid]})))
            .unwrap();
        let before = snapshot(test_db.backend());

        let err = projects
            .update(
                obj(json!({"name": "q", "measurements": [m2.eid]})),
                &Query::eid(p.eid),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "immutable_record", "{choice}");
        assert_eq!(snapshot(test_db.backend()), before, "{choice}");

        // Changing only the links is allowed
        projects
            .update(obj(json!({"measurements": [m2.eid]})), &Query::eid(p.eid))
            .unwrap();
        assert!(measurements.one(m1.eid).unwrap().unwrap().eids("projects").is_empty());
        assert_eq!(
            measurements.one(m2.eid).unwrap().unwrap().eids("projects"),
            vec![p.eid]
        );
    }
}

#[test]
fn outer_transaction_spans_several_controller_calls() {
    for choice in BackendChoice::ALL {
        let test_db = TestDatabase::open(choice, hpc_registry());
        let before = snapshot(test_db.backend());

        let result: CoreResult<()> = test_db.transaction(|db| {
            scenarios::seeded_experiment(db, "a", 2);
            db.controller("target")?
                .create(obj(json!({"name": "node-a"})))?;
            Ok(())
        });
        assert_eq!(result.unwrap_err().kind(), "unique_constraint", "{choice}");
        assert_eq!(snapshot(test_db.backend()), before, "{choice}");
    }
}
