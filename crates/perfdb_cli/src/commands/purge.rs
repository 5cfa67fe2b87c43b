//! Purge command implementation.

use perfdb_core::Config;
use tracing::info;

/// Runs the purge command.
pub fn run(config: Config, table: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_untyped(config)?;
    let before = db.backend().count(table)?;
    db.purge(table)?;
    info!(table, removed = before, "table purged");
    println!("Purged {before} records from {table}");
    println!("Run `perfdb verify` if other models reference {table}");
    Ok(())
}
