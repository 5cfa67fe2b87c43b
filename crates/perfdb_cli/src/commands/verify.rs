//! Verify command implementation.

use perfdb_core::{Config, CoreResult, Database, IntegrityIssue, Schema, SchemaRegistry};
use std::fs;
use std::path::Path;

/// Runs the verify command.
pub fn run(config: Config, schema_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(schema_path)?;
    println!(
        "Verifying {} models against {}",
        registry.models().count(),
        schema_path.display()
    );
    println!();

    let db = Database::open(config, registry)?;
    let issues = verify(&db)?;
    for issue in &issues {
        println!("  {issue}");
    }

    println!();
    if issues.is_empty() {
        println!("✓ Integrity check passed");
        Ok(())
    } else {
        println!("✗ Integrity check found {} issues", issues.len());
        Err("Verification failed".into())
    }
}

/// Loads a JSON array of model schemas.
pub fn load_registry(path: &Path) -> Result<SchemaRegistry, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let schemas: Vec<Schema> = serde_json::from_str(&text)?;
    Ok(SchemaRegistry::new(schemas)?)
}

/// Runs the integrity check.
pub fn verify(db: &Database) -> CoreResult<Vec<IntegrityIssue>> {
    db.verify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfdb_core::BackendConfig;
    use serde_json::json;

    const SCHEMAS: &str = r#"[
        {"name": "target", "attributes": [
            {"name": "name", "kind": "scalar", "type": "string", "required": true},
            {"name": "trials", "kind": "collection_ref", "target": "trial", "via": "target"}
        ]},
        {"name": "trial", "attributes": [
            {"name": "target", "kind": "model_ref", "target": "target", "via": "trials"}
        ]}
    ]"#;

    #[test]
    fn finds_dangling_reference() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        fs::write(&schema_path, SCHEMAS).unwrap();
        let registry = load_registry(&schema_path).unwrap();

        let config = Config::new().backend(BackendConfig::JsonFile {
            root: dir.path().join("store"),
        });
        let db = Database::open(config, registry).unwrap();
        let fields = json!({"target": 9}).as_object().unwrap().clone();
        db.backend().insert("trial", fields).unwrap();

        let issues = verify(&db).unwrap();
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            &issues[0],
            IntegrityIssue::DanglingReference { attribute, .. } if attribute == "target"
        ));
    }
}
