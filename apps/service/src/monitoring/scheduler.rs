use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use super::engine::Engine;
use super::interval::Cadence;
use crate::database::{FailureState, Job, JobId, JobStatus};

/// Seconds before retrying a resume that failed to persist
const RESUME_RETRY_SECS: i64 = 30;

/// What the timer task of a job should be doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to run: stopped or permanently paused
    Idle,
    /// Probe periodically at this cadence
    Every(Cadence),
    /// Sleep until the deadline, then leave the pause
    ResumeAt(DateTime<Utc>),
}

impl Plan {
    pub fn for_job(job: &Job) -> Self {
        if job.status == JobStatus::Stopped {
            return Plan::Idle;
        }

        match job.failure_state {
            FailureState::PermanentlyPaused => Plan::Idle,
            FailureState::Paused => Plan::ResumeAt(job.pause_until.unwrap_or(DateTime::<Utc>::MIN_UTC)),
            FailureState::Normal | FailureState::RapidCheck => Plan::Every(job.interval),
        }
    }
}

/// Monitoring scheduler - owns exactly one timer task per scheduled job.
///
/// The task re-plans itself after every tick: a cadence change, a pause or a
/// permanent pause swaps the running timer without going back through
/// [`MonitoringScheduler::start`]. Every start and stop path goes through the
/// handle map, so a job never has two timers.
pub struct MonitoringScheduler {
    engine: Arc<Engine>,
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl MonitoringScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, handles: Mutex::new(HashMap::new()) }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel(&self, id: JobId) -> bool {
        match self.handles().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// (Re)arm the timer of `job` from its stored state.
    ///
    /// Any existing timer for the job is cancelled first. A pause whose
    /// deadline already passed is left immediately instead of arming a timer
    /// in the past. Must not be called while holding the job's lock.
    pub async fn start(&self, job: &Job) -> Result<Plan> {
        self.cancel(job.id);
        self.prune_finished();

        if job.status == JobStatus::Stopped {
            debug!("Job {}: stopped, not scheduled", job.id);
            return Ok(Plan::Idle);
        }

        let mut job = job.clone();
        if job.failure_state == FailureState::Paused
            && job.pause_until.is_none_or(|until| until <= Utc::now())
        {
            info!("Job {}: pause expired while not scheduled, resuming now", job.id);
            match self.engine.resume(job.id).await? {
                Some(resumed) => job = resumed,
                None => return Ok(Plan::Idle),
            }
        }

        let plan = Plan::for_job(&job);
        if plan == Plan::Idle {
            debug!("Job {}: not scheduled ({} / {})", job.id, job.status, job.failure_state);
            return Ok(plan);
        }

        let handle = tokio::spawn(drive(self.engine.clone(), job.id, job.url.clone(), plan));
        if let Some(previous) = self.handles().insert(job.id, handle) {
            previous.abort();
        }

        info!("Job {}: scheduled {:?}", job.id, plan);
        Ok(plan)
    }

    /// Cancel the timer of a job and drop its failure history
    pub fn stop(&self, id: JobId) {
        if self.cancel(id) {
            info!("Job {}: stopped", id);
        }
        self.engine.history().clear(id);
    }

    /// Whether a live timer task exists for the job
    pub fn is_scheduled(&self, id: JobId) -> bool {
        let mut handles = self.handles();
        match handles.get(&id) {
            Some(handle) if handle.is_finished() => {
                handles.remove(&id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drop handles of tasks whose plan ended in [`Plan::Idle`]
    fn prune_finished(&self) {
        self.handles().retain(|_, handle| !handle.is_finished());
    }

    /// Cancel every timer
    pub fn shutdown(&self) {
        let mut handles = self.handles();
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for MonitoringScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Timer task of one job; runs plans until one ends in [`Plan::Idle`]
async fn drive(engine: Arc<Engine>, id: JobId, url: String, mut plan: Plan) {
    loop {
        plan = match plan {
            Plan::Idle => {
                debug!("Job {}: timer finished", id);
                return;
            }
            Plan::Every(cadence) => run_periodic(&engine, id, &url, cadence).await,
            Plan::ResumeAt(deadline) => run_deferred_resume(&engine, id, deadline).await,
        };
        debug!("Job {}: rescheduled as {:?}", id, plan);
    }
}

/// Tick at `cadence` until a tick leaves the job wanting a different plan
async fn run_periodic(engine: &Engine, id: JobId, url: &str, cadence: Cadence) -> Plan {
    let period = cadence.period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match engine.run_tick(id, url).await {
            Ok(Some(job)) => {
                let next = Plan::for_job(&job);
                if next != Plan::Every(cadence) {
                    return next;
                }
            }
            Ok(None) => return Plan::Idle,
            Err(e) => error!("Job {}: failed to apply probe outcome: {:#}", id, e),
        }
    }
}

async fn run_deferred_resume(engine: &Engine, id: JobId, deadline: DateTime<Utc>) -> Plan {
    let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    info!("Job {}: paused, resuming in {}s", id, wait.as_secs());
    tokio::time::sleep(wait).await;

    match engine.resume(id).await {
        Ok(Some(job)) => Plan::for_job(&job),
        Ok(None) => Plan::Idle,
        Err(e) => {
            error!("Job {}: failed to resume after pause: {:#}", id, e);
            Plan::ResumeAt(Utc::now() + TimeDelta::seconds(RESUME_RETRY_SECS))
        }
    }
}
