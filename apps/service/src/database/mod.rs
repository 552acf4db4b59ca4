/// Database abstraction layer
///
/// Versioned schema, append-only check history, and the `Storage` trait
/// consumed by the orchestrator.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlStorage, Storage};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
