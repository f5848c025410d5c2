use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::checker::Prober;
use super::escalation::{self, Alert, FAILURE_THRESHOLD, MAX_FAILURE_CYCLES};
use super::history::{FailureHistory, FailureRecord};
use super::types::ProbeOutcome;
use crate::database::{EmailKind, Job, JobId, JobStore, JobUpdate};
use crate::notifications::{Notifier, SystemAlert};

/// Per-job async locks serializing read-modify-write of a job row
#[derive(Default)]
struct JobLocks {
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobLocks {
    fn handle(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }

    fn remove(&self, id: JobId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&id);
    }
}

/// Applies probe outcomes and pause deadlines to stored jobs.
///
/// Every mutation of a job happens under that job's lock: read the row,
/// compute the transition, deliver alerts, write the row. Probes themselves
/// run outside the lock.
pub struct Engine {
    store: Arc<dyn JobStore>,
    prober: Arc<dyn Prober>,
    notifier: Notifier,
    alerts: Arc<dyn SystemAlert>,
    history: FailureHistory,
    locks: JobLocks,
    fallback_rate_limit: u32,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        prober: Arc<dyn Prober>,
        notifier: Notifier,
        alerts: Arc<dyn SystemAlert>,
        fallback_rate_limit: u32,
    ) -> Self {
        Self {
            store,
            prober,
            notifier,
            alerts,
            history: FailureHistory::new(),
            locks: JobLocks::default(),
            fallback_rate_limit,
        }
    }

    pub fn history(&self) -> &FailureHistory {
        &self.history
    }

    /// Exclusive access to a job's row until the guard is dropped
    pub async fn lock(&self, id: JobId) -> OwnedMutexGuard<()> {
        self.locks.handle(id).lock_owned().await
    }

    /// Probe a freshly created job once and store the raw snapshot.
    ///
    /// The outcome does not drive the state machine.
    pub async fn record_first_probe(&self, job: &Job) -> Result<ProbeOutcome> {
        let outcome = self.prober.probe(&job.url).await;
        debug!("Job {}: initial probe {}", job.id, outcome);

        let _guard = self.lock(job.id).await;
        self.store.update_job(job.id, &JobUpdate::probe(&outcome)).await?;
        Ok(outcome)
    }

    /// Probe `url` and apply the outcome to job `id`
    pub async fn run_tick(&self, id: JobId, url: &str) -> Result<Option<Job>> {
        let outcome = self.prober.probe(url).await;
        if outcome.succeeded {
            debug!("Job {}: {}", id, outcome);
        } else {
            warn!("Job {}: {}", id, outcome);
        }
        self.apply_outcome(id, &outcome).await
    }

    /// Feed one probe outcome into the state machine.
    ///
    /// Returns the job as stored afterwards, or `None` once it has been
    /// deleted. Outcomes for jobs that no longer accept probes are dropped and
    /// the job is returned unchanged.
    pub async fn apply_outcome(&self, id: JobId, outcome: &ProbeOutcome) -> Result<Option<Job>> {
        let _guard = self.lock(id).await;

        let Some(job) = self.store.get_job(id).await? else {
            debug!("Job {}: discarding outcome for deleted job", id);
            return Ok(None);
        };

        let now = Utc::now();
        let Some(transition) = escalation::on_probe(&job, outcome, now, self.fallback_rate_limit)
        else {
            debug!(
                "Job {}: discarding outcome, job is {} / {}",
                id, job.status, job.failure_state
            );
            return Ok(Some(job));
        };

        if outcome.succeeded {
            self.history.clear(id);
        } else {
            self.history.record(id, FailureRecord::from(outcome));
        }

        let mut update = transition.update;
        let projected = job.with_update(&update);

        match transition.alert {
            Alert::None => {}
            Alert::Recovery { downtime } => {
                info!("Job {} recovered after {}", id, downtime);
                if self.notifier.send_recovery(&projected, &downtime).await {
                    update.record_email(EmailKind::Recovery, now);
                }
            }
            Alert::Failure => {
                let history = self.history.snapshot(id);
                if self.notifier.send_failure(&projected, &history).await {
                    update.record_email(EmailKind::Failure, now);
                    self.alerts.notify(
                        "AutoPing - Site Down Alert",
                        &format!(
                            "{} has failed {} times. Email alert sent to {}",
                            job.url,
                            FAILURE_THRESHOLD,
                            job.alert_email.as_deref().unwrap_or_default()
                        ),
                    );
                }
            }
            Alert::FailureSuppressed(reason) => {
                warn!("Job {}: skipping failure email, {}", id, reason);
            }
            Alert::PermanentPause => {
                self.history.clear(id);
                self.alerts.notify(
                    "AutoPing - Site Permanently Paused",
                    &format!(
                        "{} has failed {} cycles and requires manual intervention.",
                        job.url, MAX_FAILURE_CYCLES
                    ),
                );
            }
        }

        if !self.store.update_job(id, &update).await? {
            return Ok(None);
        }

        let updated = job.with_update(&update);
        log_transition(&job, &updated);
        Ok(Some(updated))
    }

    /// Leave a pause whose deadline has passed.
    ///
    /// Returns the job as stored afterwards; a job that is no longer paused is
    /// returned unchanged.
    pub async fn resume(&self, id: JobId) -> Result<Option<Job>> {
        let _guard = self.lock(id).await;

        let Some(job) = self.store.get_job(id).await? else {
            return Ok(None);
        };
        let Some(update) = escalation::on_resume(&job) else {
            return Ok(Some(job));
        };

        if !self.store.update_job(id, &update).await? {
            return Ok(None);
        }
        self.history.clear(id);

        let updated = job.with_update(&update);
        info!(
            "Job {}: resuming after pause (cycle {}/{}), interval {}",
            id, updated.failure_cycles, MAX_FAILURE_CYCLES, updated.interval
        );
        Ok(Some(updated))
    }

    /// Drop in-memory state of a deleted job
    pub fn forget(&self, id: JobId) {
        self.history.clear(id);
        self.locks.remove(id);
    }
}

fn log_transition(before: &Job, after: &Job) {
    if before.failure_state == after.failure_state {
        return;
    }

    match after.failure_state {
        crate::database::FailureState::PermanentlyPaused => warn!(
            "Job {}: exceeded {} failure cycles, permanently paused until reset",
            after.id, MAX_FAILURE_CYCLES
        ),
        crate::database::FailureState::Paused => warn!(
            "Job {}: {} consecutive failures, paused until {}",
            after.id,
            after.failure_count,
            after.pause_until.map(|at| at.to_rfc3339()).unwrap_or_default()
        ),
        state => info!(
            "Job {}: {} -> {}, interval {}",
            after.id, before.failure_state, state, after.interval
        ),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Prober returning scripted outcomes, then repeating the fallback
    pub struct ScriptedProber {
        script: Mutex<VecDeque<bool>>,
        fallback: bool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedProber {
        pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                fallback,
                calls: Default::default(),
            }
        }

        pub fn always(succeed: bool) -> Self {
            Self::new([], succeed)
        }

        pub fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let succeed = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            if succeed {
                ProbeOutcome::success(Utc::now(), 5, 200)
            } else {
                ProbeOutcome::failure(Utc::now(), 5, "Request failed with status code 503")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProber;
    use super::*;
    use crate::database::{FailureState, JobStatus, LibsqlJobStore, NewJob, initialize_database};
    use crate::monitoring::interval::Cadence;
    use crate::notifications::testing::{RecordingAlert, RecordingMailer};
    use crate::pool::open_pool;
    use tempfile::TempDir;

    struct Fixture {
        engine: Engine,
        store: Arc<dyn JobStore>,
        mailer: RecordingMailer,
        alerts: RecordingAlert,
        _dir: TempDir,
    }

    async fn fixture(mailer: RecordingMailer) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("engine.db")).await.unwrap();
        initialize_database(&*pool.get().await.unwrap()).await.unwrap();
        let store: Arc<dyn JobStore> = Arc::new(LibsqlJobStore::new(pool));
        let alerts = RecordingAlert::default();

        let engine = Engine::new(
            store.clone(),
            Arc::new(ScriptedProber::always(true)),
            Notifier::new(Box::new(mailer.clone())),
            Arc::new(alerts.clone()),
            60,
        );

        Fixture { engine, store, mailer, alerts, _dir: dir }
    }

    async fn create(store: &Arc<dyn JobStore>) -> Job {
        store
            .create_job(&NewJob {
                url: "https://down.test".into(),
                interval: Cadence::FiveMinutes,
                alert_email: Some("ops@example.test".into()),
                email_rate_limit: 30,
            })
            .await
            .unwrap()
    }

    fn fail() -> ProbeOutcome {
        ProbeOutcome::failure(Utc::now(), 12, "Request failed with status code 502")
    }

    fn ok() -> ProbeOutcome {
        ProbeOutcome::success(Utc::now(), 12, 200)
    }

    #[tokio::test]
    async fn test_threshold_sends_failure_email_and_stamps() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;

        for _ in 0..3 {
            f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        }

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_state, FailureState::Paused);
        assert_eq!(stored.last_email_type, Some(EmailKind::Failure));
        assert!(stored.last_email_sent.is_some());
        assert_eq!(stored.email_sent_at, stored.last_email_sent);
        assert_eq!(f.mailer.subjects(), vec!["AutoPing Alert: https://down.test is DOWN"]);
        assert_eq!(*f.alerts.titles.lock().unwrap(), vec!["AutoPing - Site Down Alert"]);

        let sent = f.mailer.sent.lock().unwrap();
        assert!(sent[0].text.contains("  3. "));
    }

    #[tokio::test]
    async fn test_undelivered_failure_email_still_pauses() {
        let f = fixture(RecordingMailer::failing()).await;
        let job = create(&f.store).await;

        for _ in 0..3 {
            f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        }

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_state, FailureState::Paused);
        assert!(stored.pause_until.is_some());
        assert_eq!(stored.last_email_type, None);
        assert_eq!(stored.last_email_sent, None);
        assert!(f.alerts.titles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outcome_during_pause_is_discarded() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;
        for _ in 0..3 {
            f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        }
        let paused = f.store.get_job(job.id).await.unwrap().unwrap();

        let returned = f.engine.apply_outcome(job.id, &ok()).await.unwrap().unwrap();

        assert_eq!(returned, paused);
        assert_eq!(f.store.get_job(job.id).await.unwrap().unwrap(), paused);
    }

    #[tokio::test]
    async fn test_recovery_after_pause_sends_recovery_email() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;
        for _ in 0..3 {
            f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        }

        let resumed = f.engine.resume(job.id).await.unwrap().unwrap();
        assert_eq!(resumed.failure_state, FailureState::Normal);
        assert_eq!(resumed.failure_cycles, 1);
        assert_eq!(resumed.interval, Cadence::FiveMinutes);

        let recovered = f.engine.apply_outcome(job.id, &ok()).await.unwrap().unwrap();
        assert_eq!(recovered.failure_cycles, 0);
        assert_eq!(recovered.last_email_type, Some(EmailKind::Recovery));
        assert_eq!(
            f.mailer.subjects().last().map(String::as_str),
            Some("AutoPing Recovery: https://down.test is BACK ONLINE")
        );
    }

    #[tokio::test]
    async fn test_permanent_pause_alerts_locally() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;
        let update = JobUpdate { failure_cycles: Some(MAX_FAILURE_CYCLES), ..Default::default() };
        f.store.update_job(job.id, &update).await.unwrap();

        for _ in 0..3 {
            f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        }

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_state, FailureState::PermanentlyPaused);
        assert_eq!(stored.status, JobStatus::Stopped);
        assert!(stored.permanently_paused);
        assert!(f.mailer.subjects().is_empty());
        assert_eq!(*f.alerts.titles.lock().unwrap(), vec!["AutoPing - Site Permanently Paused"]);
        assert_eq!(f.engine.history().len(job.id), 0);
    }

    #[tokio::test]
    async fn test_history_tracks_failures() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;

        f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        f.engine.apply_outcome(job.id, &fail()).await.unwrap();
        assert_eq!(f.engine.history().len(job.id), 2);

        f.engine.apply_outcome(job.id, &ok()).await.unwrap();
        assert_eq!(f.engine.history().len(job.id), 0);
    }

    #[tokio::test]
    async fn test_first_probe_only_records_snapshot() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;

        f.engine.record_first_probe(&job).await.unwrap();

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.last_result.as_deref(), Some("Success: 200"));
        assert!(stored.last_run.is_some());
        assert_eq!(stored.failure_state, FailureState::Normal);
    }

    #[tokio::test]
    async fn test_deleted_job_yields_none() {
        let f = fixture(RecordingMailer::default()).await;
        let job = create(&f.store).await;
        f.store.delete_job(job.id).await.unwrap();

        assert!(f.engine.apply_outcome(job.id, &fail()).await.unwrap().is_none());
        assert!(f.engine.resume(job.id).await.unwrap().is_none());
    }
}
