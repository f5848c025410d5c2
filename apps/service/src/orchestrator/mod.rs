/// Orchestrator module - the command and read facade over the job set
///
/// The orchestrator wires the store, the monitoring engine and the scheduler
/// together and exposes the operations an operator surface needs:
/// - listing jobs with their next run
/// - creating, toggling, resetting and deleting jobs
/// - updating a job's alert email


use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{Alerts, Config};
use crate::database::{FailureState, Job, JobId, JobStatus, JobStore, JobUpdate, LibsqlJobStore, NewJob};
use crate::error::{ServiceError, ServiceResult};
use crate::monitoring::escalation;
use crate::monitoring::{Cadence, Engine, HttpProber, MonitoringScheduler, Prober};
use crate::notifications::{LogAlert, Notifier, SystemAlert, mailer_from_config};

/// Request to start monitoring a target
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateJob {
    pub url: String,
    /// Cadence label; unknown or missing labels mean one minute
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub alert_email: Option<String>,
    #[serde(default)]
    pub email_rate_limit: Option<u32>,
}

/// A job as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    /// Next expected activity; `None` for stopped jobs
    pub next_run: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn project(job: Job, now: DateTime<Utc>) -> Self {
        let next_run = match (job.status, job.failure_state) {
            (JobStatus::Stopped, _) => None,
            (_, FailureState::Paused) => job.pause_until,
            _ => Some(job.interval.next_run_after(now)),
        };
        Self { job, next_run }
    }
}

/// Main orchestrator for the AutoPing service
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    engine: Arc<Engine>,
    scheduler: MonitoringScheduler,
    default_rate_limit: u32,
}

impl Orchestrator {
    /// Open the configured store and build the production collaborators
    pub async fn from_config(config: &Config) -> Result<Arc<Self>> {
        info!("Opening job store at {}", config.database.path.display());
        let store = Arc::new(LibsqlJobStore::open(&config.database.path).await?);
        let prober = Arc::new(HttpProber::new()?);
        let notifier = Notifier::new(mailer_from_config(&config.smtp));

        Ok(Arc::new(Self::new(store, prober, notifier, Arc::new(LogAlert), &config.alerts)))
    }

    pub fn new(
        store: Arc<dyn JobStore>,
        prober: Arc<dyn Prober>,
        notifier: Notifier,
        alerts: Arc<dyn SystemAlert>,
        limits: &Alerts,
    ) -> Self {
        let engine = Arc::new(Engine::new(
            store.clone(),
            prober,
            notifier,
            alerts,
            limits.fallback_rate_limit_minutes,
        ));

        Self {
            store,
            scheduler: MonitoringScheduler::new(engine.clone()),
            engine,
            default_rate_limit: limits.default_rate_limit_minutes,
        }
    }

    pub fn scheduler(&self) -> &MonitoringScheduler {
        &self.scheduler
    }

    /// Schedule every stored job. Returns how many got a live timer.
    pub async fn start_all(&self) -> Result<usize> {
        let jobs = self.store.list_jobs().await?;
        info!("Found {} stored jobs", jobs.len());

        let mut scheduled = 0;
        for job in &jobs {
            match self.scheduler.start(job).await {
                Ok(plan) if plan != crate::monitoring::Plan::Idle => scheduled += 1,
                Ok(_) => {}
                Err(e) => error!("Job {}: failed to schedule: {:#}", job.id, e),
            }
        }

        info!("Scheduled {} of {} jobs", scheduled, jobs.len());
        Ok(scheduled)
    }

    async fn require(&self, id: JobId) -> ServiceResult<Job> {
        self.store.get_job(id).await?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn get_job(&self, id: JobId) -> ServiceResult<Job> {
        self.require(id).await
    }

    /// Every job, newest first, with its projected next run
    pub async fn list_jobs(&self) -> ServiceResult<Vec<JobView>> {
        let now = Utc::now();
        let jobs = self.store.list_jobs().await?;
        Ok(jobs.into_iter().map(|job| JobView::project(job, now)).collect())
    }

    /// Store a new job, probe it once, then schedule it
    pub async fn create_job(&self, request: CreateJob) -> ServiceResult<Job> {
        let url = validate_url(&request.url)?;
        let alert_email = validate_email(request.alert_email.as_deref())?;
        let interval = request.interval.as_deref().map(Cadence::from_label).unwrap_or_default();

        let job = self
            .store
            .create_job(&NewJob {
                url,
                interval,
                alert_email,
                email_rate_limit: request.email_rate_limit.unwrap_or(self.default_rate_limit),
            })
            .await?;
        info!("Job {}: created for {} every {}", job.id, job.url, job.interval);

        if let Err(e) = self.engine.record_first_probe(&job).await {
            warn!("Job {}: failed to record initial probe: {:#}", job.id, e);
        }

        let job = self.require(job.id).await?;
        self.scheduler.start(&job).await?;
        Ok(job)
    }

    /// Flip a job between active and stopped.
    ///
    /// A permanently paused job cannot be toggled; it has to be reset.
    pub async fn toggle_job(&self, id: JobId) -> ServiceResult<Job> {
        let guard = self.engine.lock(id).await;
        let job = self.require(id).await?;

        if job.permanently_paused || job.failure_state == FailureState::PermanentlyPaused {
            return Err(ServiceError::PermanentlyPaused(id));
        }

        let update = JobUpdate { status: Some(job.status.toggled()), ..Default::default() };
        self.store.update_job(id, &update).await?;
        let job = job.with_update(&update);

        if job.status == JobStatus::Stopped {
            self.scheduler.stop(id);
        }
        drop(guard);

        if job.status == JobStatus::Active {
            self.scheduler.start(&job).await?;
        }

        info!("Job {}: toggled to {}", id, job.status);
        Ok(job)
    }

    /// Bring a permanently paused job back to normal monitoring
    pub async fn reset_job(&self, id: JobId) -> ServiceResult<Job> {
        let guard = self.engine.lock(id).await;
        let job = self.require(id).await?;

        let update = escalation::manual_reset(&job)?;
        self.store.update_job(id, &update).await?;
        self.engine.history().clear(id);
        drop(guard);

        let job = job.with_update(&update);
        self.scheduler.start(&job).await?;

        info!("Job {}: manually reset, monitoring every {}", id, job.interval);
        Ok(job)
    }

    /// Set or clear (empty / `None`) the alert email of a job
    pub async fn update_alert_email(&self, id: JobId, email: Option<String>) -> ServiceResult<Job> {
        let alert_email = validate_email(email.as_deref())?;

        let _guard = self.engine.lock(id).await;
        let job = self.require(id).await?;

        let update = JobUpdate { alert_email: Some(alert_email), ..Default::default() };
        self.store.update_job(id, &update).await?;

        info!("Job {}: alert email updated", id);
        Ok(job.with_update(&update))
    }

    /// Cancel the timer, then remove the job and its in-memory state
    pub async fn delete_job(&self, id: JobId) -> ServiceResult<()> {
        let guard = self.engine.lock(id).await;
        self.require(id).await?;

        self.scheduler.stop(id);
        self.store.delete_job(id).await?;
        drop(guard);
        self.engine.forget(id);

        info!("Job {}: deleted", id);
        Ok(())
    }

    /// Cancel every timer
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        info!("All monitoring timers stopped");
    }
}

fn validate_url(raw: &str) -> ServiceResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ServiceError::InvalidRequest("url is required".into()));
    }

    let parsed = url::Url::parse(raw)
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid url {raw:?}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        scheme => Err(ServiceError::InvalidRequest(format!("unsupported url scheme {scheme:?}"))),
    }
}

fn validate_email(raw: Option<&str>) -> ServiceResult<Option<String>> {
    let Some(email) = raw.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    email
        .parse::<lettre::Address>()
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid alert email {email:?}: {e}")))?;
    Ok(Some(email.to_string()))
}
