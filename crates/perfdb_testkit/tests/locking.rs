//! Inter-process locking and cross-instance visibility.

use perfdb_core::{BackendConfig, BackendKind, Config, CoreError, Database, LOCK_FILE};
use perfdb_testkit::prelude::*;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

fn open(kind: BackendKind, root: &Path, timeout: Option<Duration>) -> Database {
    let mut config = Config::new().backend(BackendConfig::on_disk(kind, root));
    if let Some(timeout) = timeout {
        config = config.lock_timeout(timeout);
    }
    Database::open(config, hpc_registry()).unwrap()
}

#[test]
fn second_instance_times_out_while_first_holds_the_lock() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = tempfile::tempdir().unwrap();
        let first = open(kind, dir.path(), None);
        let second = open(kind, dir.path(), Some(Duration::from_millis(100)));

        first
            .transaction(|db| {
                db.controller("target")?
                    .create(obj(json!({"name": "held"})))?;
                let err = second
                    .controller("target")?
                    .create(obj(json!({"name": "blocked"})))
                    .unwrap_err();
                assert!(matches!(err, CoreError::LockTimeout { .. }), "{kind}: {err}");
                Ok(())
            })
            .unwrap();

        assert!(dir.path().join(LOCK_FILE).exists());
        // Committed work is visible to the other instance
        let names: Vec<_> = second
            .controller("target")
            .unwrap()
            .all()
            .unwrap()
            .into_iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["held".to_string()], "{kind}");
    }
}

#[test]
fn concurrent_instances_never_lose_writes() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let db = open(kind, &root, None);
                    for n in 0..5 {
                        db.controller("application")
                            .unwrap()
                            .create(obj(json!({"name": format!("app-{worker}-{n}")})))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let db = open(kind, &root, None);
        let apps = db.controller("application").unwrap().all().unwrap();
        assert_eq!(apps.len(), 20, "{kind}");
        let mut eids: Vec<_> = apps.iter().map(|r| r.eid).collect();
        eids.dedup();
        assert_eq!(eids.len(), 20, "{kind}");
    }
}

#[test]
fn missing_root_is_not_created_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("absent");
    let config = Config::new()
        .json_file(&root)
        .create_if_missing(false);
    let err = Database::open(config, hpc_registry()).err().unwrap();
    assert_eq!(err.kind(), "io");
    assert!(!root.exists());
}
