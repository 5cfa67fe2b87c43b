//! Inspect command implementation.

use perfdb_core::{Config, CoreResult, Database};
use serde::Serialize;

/// Storage inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Backend description.
    pub backend: String,
    /// Storage root.
    pub root: Option<String>,
    /// Per-table statistics, sorted by name.
    pub tables: Vec<TableStats>,
    /// Records across all tables.
    pub total_records: usize,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of records.
    pub records: usize,
}

/// Runs the inspect command.
pub fn run(config: Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_untyped(config)?;
    let result = inspect(&db)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects table statistics.
pub fn inspect(db: &Database) -> CoreResult<InspectResult> {
    let backend = db.backend();
    let mut names = backend.table_names()?;
    names.sort();

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let records = backend.count(&name)?;
        tables.push(TableStats { name, records });
    }

    Ok(InspectResult {
        backend: format!("{:?}", db.config().backend),
        root: backend.location().map(|path| path.display().to_string()),
        total_records: tables.iter().map(|table| table.records).sum(),
        tables,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("perfdb Storage Inspection");
    println!("=========================");
    println!();
    if let Some(root) = &result.root {
        println!("Root: {root}");
    }
    println!("Backend: {}", result.backend);
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        println!("  {:<24} {} records", table.name, table.records);
    }
    println!();
    println!("Total records: {}", result.total_records);
}
