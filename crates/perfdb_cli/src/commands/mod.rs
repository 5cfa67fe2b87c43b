//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod purge;
pub mod verify;

use perfdb_core::{Config, CoreResult, Database, SchemaRegistry};

/// Opens a database whose schemas are not needed by the command.
pub fn open_untyped(config: Config) -> CoreResult<Database> {
    Database::open(config, SchemaRegistry::new(Vec::new())?)
}
