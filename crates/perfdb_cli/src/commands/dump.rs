//! Dump command implementation.

use perfdb_core::{Config, CoreResult, Database, Query, Record};

/// Runs the dump command.
pub fn run(config: Config, table: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_untyped(config)?;
    let records = dump(&db, table)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            println!("{table}: {} records", records.len());
            for record in &records {
                println!("  [{}] {}", record.eid, serde_json::to_string(&record.fields)?);
            }
        }
    }

    Ok(())
}

/// Returns every record of a table in EID order.
pub fn dump(db: &Database, table: &str) -> CoreResult<Vec<Record>> {
    Ok(db.backend().search(table, &Query::all())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dumps_in_eid_order() {
        let db = super::super::open_untyped(Config::default()).unwrap();
        for n in 0..3 {
            let fields = json!({ "n": n }).as_object().unwrap().clone();
            db.backend().insert("trial", fields).unwrap();
        }

        let records = dump(&db, "trial").unwrap();
        let ns: Vec<_> = records.iter().map(|r| r.get("n").cloned().unwrap()).collect();
        assert_eq!(ns, vec![json!(0), json!(1), json!(2)]);
        assert!(dump(&db, "missing").unwrap().is_empty());
    }
}
