//! Storage collaborator
//!
//! `Database` is the contract the scheduling core talks to. `DatabaseImpl`
//! backs it with libsql; `MemoryDatabase` keeps everything in process.

pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use memory::MemoryDatabase;
pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
