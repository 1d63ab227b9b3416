//! JSON Schema generation for CLI output types.
//!
//! Every command that supports `--json` has a schema here. Schemas are
//! generated with schemars and exported through the `schema` subcommand.

use schemars::{schema_for, Schema};
use std::collections::BTreeMap;

/// All schemas, keyed by command name.
/// BTreeMap keeps the ordering deterministic for diffable output.
pub fn all_schemas() -> BTreeMap<&'static str, Schema> {
    let mut schemas = BTreeMap::new();

    schemas.insert("detect", schema_for!(crate::overflow::OverflowFinding));

    // emitted on stdout by any command that fails in --json mode
    schemas.insert("error", schema_for!(crate::error::ErrorReport));

    schemas.insert("execute", schema_for!(crate::staging::ExecuteReport));

    schemas.insert("load", schema_for!(crate::session::LoadReport));

    schemas.insert("normalize", schema_for!(crate::session::NormalizeReport));

    schemas.insert("preview", schema_for!(crate::staging::PreviewReport));

    // profile without --column
    schemas.insert("profile", schema_for!(crate::profile::ProfileReport));

    // profile --column <name>
    schemas.insert("profile-column", schema_for!(crate::profile::ColumnReport));

    schemas.insert("query", schema_for!(crate::engine::QueryResult));

    schemas.insert("repair", schema_for!(crate::overflow::RepairReport));

    schemas
}

/// Generate a single schema by command name.
pub fn get_schema(command: &str) -> Option<Schema> {
    all_schemas().remove(command)
}

/// List all available schema names.
pub fn schema_names() -> Vec<&'static str> {
    all_schemas().keys().copied().collect()
}
