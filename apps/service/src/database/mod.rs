/// Job persistence on a local libSQL file
pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{EmailKind, FailureState, Job, JobId, JobStatus, JobUpdate, NewJob};
pub use repository::{JobStore, LibsqlJobStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
