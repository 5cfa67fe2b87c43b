//! Every backend honors the same storage contract.

use perfdb_core::StorageBackend;
use perfdb_storage::{InMemoryBackend, SqliteBackend};
use perfdb_testkit::prelude::*;
use proptest::prelude::*;

#[test]
fn contract_script_matches_across_backends() {
    let reference = contract_script(&InMemoryBackend::new());
    for choice in BackendChoice::ALL {
        let store = TestStore::open(choice);
        assert_eq!(contract_script(&*store), reference, "{choice}");
    }
}

#[test]
fn contract_script_reference_values() {
    let transcript = contract_script(&InMemoryBackend::new());
    let entry = |label: &str| {
        transcript
            .iter()
            .find_map(|v| v.get(label).cloned())
            .unwrap()
    };
    assert_eq!(entry("insert"), serde_json::json!([1, 2, 3]));
    assert_eq!(entry("search_and"), serde_json::json!([3]));
    assert_eq!(entry("search_or"), serde_json::json!([1, 3]));
    assert_eq!(entry("search_unknown_field"), serde_json::json!([]));
    assert_eq!(entry("search_inside"), serde_json::json!([1]));
    assert_eq!(entry("unset_2"), serde_json::json!([1, 3]));
    assert_eq!(
        entry("exit_without_enter"),
        serde_json::json!({"error": "no_transaction"})
    );
    assert_eq!(entry("count"), serde_json::json!(2));
    assert_eq!(
        entry("case_sensitive_names"),
        serde_json::json!([{"eid": 1, "fields": {"Name": 1, "name": 2, "EID": 5}}])
    );
    assert_eq!(
        entry("tables"),
        serde_json::json!(["Cased", "cased", "trial"])
    );
}

#[test]
fn on_disk_backends_survive_reopen() {
    for choice in BackendChoice::ON_DISK {
        let dir = tempfile::tempdir().unwrap();
        let open = || -> Box<dyn StorageBackend> {
            match choice {
                BackendChoice::Json => {
                    Box::new(perfdb_storage::JsonFileBackend::open(dir.path()).unwrap())
                }
                _ => Box::new(SqliteBackend::open(dir.path()).unwrap()),
            }
        };

        let first = open();
        contract_script(first.as_ref());
        let expected = snapshot(first.as_ref());
        drop(first);

        let second = open();
        assert_eq!(snapshot(second.as_ref()), expected, "{choice}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn generated_sequences_match(ops in storage_ops_strategy(24)) {
        let memory = InMemoryBackend::new();
        let sqlite = SqliteBackend::open_in_memory().unwrap();
        let remote = loopback_remote();

        let expected = replay_storage_ops(&memory, &ops);
        prop_assert_eq!(&replay_storage_ops(&sqlite, &ops), &expected);
        prop_assert_eq!(&replay_storage_ops(&remote, &ops), &expected);
    }
}
