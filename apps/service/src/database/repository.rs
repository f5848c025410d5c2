use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params};

use super::models::{Job, JobId, JobUpdate, NewJob};
use crate::monitoring::interval::Cadence;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Persistence of jobs.
///
/// `update_job` is a single statement, so a partial update is never
/// observed half applied.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job with fresh escalation state and return it
    async fn create_job(&self, job: &NewJob) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// All jobs, newest first
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Apply `update` to one job. Returns false when no such job exists.
    async fn update_job(&self, id: JobId, update: &JobUpdate) -> Result<bool>;

    /// Returns false when no such job exists
    async fn delete_job(&self, id: JobId) -> Result<bool>;
}

const JOB_COLUMNS: &str = "id, url, alert_email, interval, original_interval, status, \
    failure_state, failure_count, failure_cycles, failure_started_at, pause_until, \
    permanently_paused, email_rate_limit, last_email_sent, email_sent_at, last_email_type, \
    last_run, last_duration, last_result, created_at";

/// libSQL backed [`JobStore`]
pub struct LibsqlJobStore {
    pool: LibsqlPool,
}

impl LibsqlJobStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open the database file at `path` and bring its schema up to date
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let store = Self::new(crate::pool::open_pool(path).await?);
        let conn = store.get_conn().await?;
        super::initialize_database(&conn).await?;
        drop(conn);
        Ok(store)
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("failed to get database connection: {e}"))
    }
}

fn millis(at: DateTime<Utc>) -> Value {
    Value::Integer(at.timestamp_millis())
}

fn optional_millis(at: Option<DateTime<Utc>>) -> Value {
    at.map(millis).unwrap_or(Value::Null)
}

fn optional_text<T: AsRef<str>>(text: Option<T>) -> Value {
    text.map(|t| Value::Text(t.as_ref().to_string())).unwrap_or(Value::Null)
}

fn timestamp(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    Ok(row.get::<Option<i64>>(idx)?.and_then(DateTime::from_timestamp_millis))
}

fn job_from_row(row: &Row) -> Result<Job> {
    let status: String = row.get(5)?;
    let failure_state: String = row.get(6)?;
    let last_email_type: Option<String> = row.get(15)?;
    let created_at: i64 = row.get(19)?;

    Ok(Job {
        id: row.get(0)?,
        url: row.get(1)?,
        alert_email: row.get(2)?,
        interval: Cadence::from_label(&row.get::<String>(3)?),
        original_interval: row.get::<Option<String>>(4)?.map(Cadence::from),
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        failure_state: failure_state.parse().map_err(|e: String| anyhow!(e))?,
        failure_count: row.get::<i64>(7)?.max(0) as u32,
        failure_cycles: row.get::<i64>(8)?.max(0) as u32,
        failure_started_at: timestamp(row, 9)?,
        pause_until: timestamp(row, 10)?,
        permanently_paused: row.get::<i64>(11)? != 0,
        email_rate_limit: row.get::<i64>(12)?.max(0) as u32,
        last_email_sent: timestamp(row, 13)?,
        email_sent_at: timestamp(row, 14)?,
        last_email_type: last_email_type
            .map(|kind| kind.parse().map_err(|e: String| anyhow!(e)))
            .transpose()?,
        last_run: timestamp(row, 16)?,
        last_duration: row.get::<Option<i64>>(17)?.map(|ms| ms.max(0) as u64),
        last_result: row.get(18)?,
        created_at: DateTime::from_timestamp_millis(created_at)
            .with_context(|| format!("invalid created_at {created_at}"))?,
    })
}

/// Column assignments for a partial update, in a stable order
fn assignments(update: &JobUpdate) -> Vec<(&'static str, Value)> {
    let mut sets = Vec::new();

    if let Some(email) = &update.alert_email {
        sets.push(("alert_email", optional_text(email.as_deref())));
    }
    if let Some(interval) = update.interval {
        sets.push(("interval", Value::Text(interval.label().to_string())));
    }
    if let Some(original) = update.original_interval {
        sets.push(("original_interval", optional_text(original.map(Cadence::label))));
    }
    if let Some(status) = update.status {
        sets.push(("status", Value::Text(status.as_str().to_string())));
    }
    if let Some(state) = update.failure_state {
        sets.push(("failure_state", Value::Text(state.as_str().to_string())));
    }
    if let Some(count) = update.failure_count {
        sets.push(("failure_count", Value::Integer(count.into())));
    }
    if let Some(cycles) = update.failure_cycles {
        sets.push(("failure_cycles", Value::Integer(cycles.into())));
    }
    if let Some(at) = update.failure_started_at {
        sets.push(("failure_started_at", optional_millis(at)));
    }
    if let Some(at) = update.pause_until {
        sets.push(("pause_until", optional_millis(at)));
    }
    if let Some(flag) = update.permanently_paused {
        sets.push(("permanently_paused", Value::Integer(flag.into())));
    }
    if let Some(at) = update.last_email_sent {
        sets.push(("last_email_sent", optional_millis(at)));
    }
    if let Some(at) = update.email_sent_at {
        sets.push(("email_sent_at", optional_millis(at)));
    }
    if let Some(kind) = update.last_email_type {
        sets.push(("last_email_type", optional_text(kind.map(|k| k.as_str()))));
    }
    if let Some(at) = update.last_run {
        sets.push(("last_run", millis(at)));
    }
    if let Some(ms) = update.last_duration {
        sets.push(("last_duration", Value::Integer(ms.min(i64::MAX as u64) as i64)));
    }
    if let Some(result) = &update.last_result {
        sets.push(("last_result", Value::Text(result.clone())));
    }

    sets
}

#[async_trait]
impl JobStore for LibsqlJobStore {
    async fn create_job(&self, job: &NewJob) -> Result<Job> {
        let conn = self.get_conn().await?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO jobs (url, alert_email, interval, email_rate_limit, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                job.url.clone(),
                optional_text(job.alert_email.as_deref()),
                job.interval.label(),
                i64::from(job.email_rate_limit),
                created_at.timestamp_millis()
            ],
        )
        .await?;

        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_job(id).await?.with_context(|| format!("job {id} vanished after insert"))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"), ())
            .await?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(job_from_row(&row)?);
        }

        Ok(jobs)
    }

    async fn update_job(&self, id: JobId, update: &JobUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.get_job(id).await?.is_some());
        }
        let sets = assignments(update);

        let columns = sets.iter().map(|(column, _)| format!("{column} = ?")).collect::<Vec<_>>();
        let sql = format!("UPDATE jobs SET {} WHERE id = ?", columns.join(", "));

        let mut values: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
        values.push(Value::Integer(id));

        let conn = self.get_conn().await?;
        let changed = conn.execute(&sql, libsql::params_from_iter(values)).await?;
        Ok(changed > 0)
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?", params![id]).await?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::database::models::{EmailKind, FailureState, JobStatus};
    use crate::pool::open_pool;
    use tempfile::TempDir;

    async fn test_store() -> (LibsqlJobStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("jobs.db")).await.unwrap();
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        drop(conn);
        (LibsqlJobStore::new(pool), dir)
    }

    fn new_job(url: &str) -> NewJob {
        NewJob {
            url: url.to_string(),
            interval: Cadence::FiveMinutes,
            alert_email: Some("ops@example.test".to_string()),
            email_rate_limit: 30,
        }
    }

    #[tokio::test]
    async fn test_create_starts_fresh() {
        let (store, _dir) = test_store().await;

        let job = store.create_job(&new_job("https://a.test")).await.unwrap();

        assert_eq!(job.url, "https://a.test");
        assert_eq!(job.interval, Cadence::FiveMinutes);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.failure_state, FailureState::Normal);
        assert_eq!(job.failure_count, 0);
        assert_eq!(job.failure_cycles, 0);
        assert!(!job.permanently_paused);
        assert_eq!(job.pause_until, None);
        assert_eq!(job.last_run, None);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (store, _dir) = test_store().await;

        let first = store.create_job(&new_job("https://a.test")).await.unwrap();
        let second = store.create_job(&new_job("https://b.test")).await.unwrap();

        let ids: Vec<_> = store.list_jobs().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_and_clears() {
        let (store, _dir) = test_store().await;
        let job = store.create_job(&new_job("https://a.test")).await.unwrap();
        let at = DateTime::from_timestamp_millis(1_760_000_000_123).unwrap();

        let mut update = JobUpdate {
            failure_state: Some(FailureState::Paused),
            failure_count: Some(3),
            pause_until: Some(Some(at)),
            original_interval: Some(Some(Cadence::FiveMinutes)),
            interval: Some(Cadence::FifteenSeconds),
            ..Default::default()
        };
        update.record_email(EmailKind::Failure, at);
        assert!(store.update_job(job.id, &update).await.unwrap());

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_state, FailureState::Paused);
        assert_eq!(stored.pause_until, Some(at));
        assert_eq!(stored.original_interval, Some(Cadence::FiveMinutes));
        assert_eq!(stored.last_email_type, Some(EmailKind::Failure));
        assert_eq!(stored.alert_email.as_deref(), Some("ops@example.test"));

        let clear = JobUpdate {
            pause_until: Some(None),
            original_interval: Some(None),
            alert_email: Some(None),
            ..Default::default()
        };
        store.update_job(job.id, &clear).await.unwrap();

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.pause_until, None);
        assert_eq!(stored.original_interval, None);
        assert_eq!(stored.alert_email, None);
        assert_eq!(stored.failure_count, 3);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let (store, _dir) = test_store().await;

        assert!(store.get_job(42).await.unwrap().is_none());
        let update = JobUpdate { failure_count: Some(1), ..Default::default() };
        assert!(!store.update_job(42, &update).await.unwrap());
        assert!(!store.delete_job(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_update_reports_existence() {
        let (store, _dir) = test_store().await;
        let job = store.create_job(&new_job("https://a.test")).await.unwrap();

        assert!(store.update_job(job.id, &JobUpdate::default()).await.unwrap());
        assert!(!store.update_job(job.id + 1, &JobUpdate::default()).await.unwrap());
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _dir) = test_store().await;
        let job = store.create_job(&new_job("https://a.test")).await.unwrap();

        assert!(store.delete_job(job.id).await.unwrap());
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }
}
