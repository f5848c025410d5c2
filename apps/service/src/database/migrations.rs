use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Every migration is recorded in `schema_migrations`, so running this on an
/// up to date database is a no-op.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!(version = current_version, "database schema is up to date");
        return Ok(());
    }

    tracing::info!(from = current_version, to = SCHEMA_VERSION, "running migrations");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Create jobs table").await?;
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    match rows.next().await? {
        Some(row) => Ok(row.get::<Option<i32>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp_millis(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: the jobs table.
///
/// Timestamps are unix milliseconds; enums are stored as their text form.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            alert_email TEXT,
            interval TEXT NOT NULL DEFAULT '1 minute',
            original_interval TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            failure_state TEXT NOT NULL DEFAULT 'normal',
            failure_count INTEGER NOT NULL DEFAULT 0,
            failure_cycles INTEGER NOT NULL DEFAULT 0,
            failure_started_at INTEGER,
            pause_until INTEGER,
            permanently_paused INTEGER NOT NULL DEFAULT 0,
            email_rate_limit INTEGER NOT NULL DEFAULT 30,
            last_email_sent INTEGER,
            email_sent_at INTEGER,
            last_email_type TEXT,
            last_run INTEGER,
            last_duration INTEGER,
            last_result TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)", ())
        .await?;

    Ok(())
}
