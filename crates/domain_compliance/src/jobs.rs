//! Scheduled background jobs
//!
//! A `Scheduler` ticks on a tokio interval and runs each registered job.
//! Jobs that must not overlap across processes take a named `TaskLock`
//! around every run; a run whose lock is held elsewhere is skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use core_kernel::UserIdentity;

use crate::error::ComplianceError;
use crate::legacy::LegacyConsumer;
use crate::ports::TaskLock;
use crate::workflow::ReportWorkflow;

/// Task name of the auto-submit job
pub const AUTO_SUBMIT_TASK: &str = "auto_submit_supplemental_drafts";

/// Task name of the legacy consumer
pub const LEGACY_CONSUMER_TASK: &str = "legacy_report_consumer";

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Days a supplemental may sit in Draft before it is submitted
    pub auto_submit_after_days: i64,
    pub tick_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            auto_submit_after_days: 30,
            tick_interval_secs: 3600,
        }
    }
}

/// A unit of background work
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Task name; also the lock key
    fn name(&self) -> &str;

    /// Whether runs must be exclusive across processes
    fn exclusive(&self) -> bool {
        true
    }

    /// Runs once and returns the number of items handled
    async fn run(&self) -> Result<usize, ComplianceError>;
}

/// Submits supplemental drafts nobody touched for too long
pub struct AutoSubmitJob {
    workflow: Arc<ReportWorkflow>,
    after_days: i64,
}

impl AutoSubmitJob {
    pub fn new(workflow: Arc<ReportWorkflow>, after_days: i64) -> Self {
        Self { workflow, after_days }
    }
}

#[async_trait]
impl ScheduledJob for AutoSubmitJob {
    fn name(&self) -> &str {
        AUTO_SUBMIT_TASK
    }

    async fn run(&self) -> Result<usize, ComplianceError> {
        let system = UserIdentity::system();
        let cutoff = Utc::now() - chrono::Duration::days(self.after_days);
        let stale = self.workflow.stale_supplemental_drafts(&system, cutoff).await?;
        debug!(count = stale.len(), %cutoff, "stale supplemental drafts");

        let mut submitted = 0;
        for report in stale {
            match self.workflow.submit(&system, report.id).await {
                Ok(_) => {
                    info!(report_id = %report.id, organization = %report.organization_id, "supplemental auto-submitted");
                    submitted += 1;
                }
                Err(e) => {
                    warn!(report_id = %report.id, error = %e, "auto-submit failed");
                }
            }
        }
        Ok(submitted)
    }
}

#[async_trait]
impl ScheduledJob for LegacyConsumer {
    fn name(&self) -> &str {
        LEGACY_CONSUMER_TASK
    }

    /// Inbox rows are claimed with SKIP LOCKED, so consumers run concurrently
    fn exclusive(&self) -> bool {
        false
    }

    async fn run(&self) -> Result<usize, ComplianceError> {
        Ok(self.poll_once().await?.fetched())
    }
}

/// Runs registered jobs on a fixed tick
pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    lock: Arc<dyn TaskLock>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(lock: Arc<dyn TaskLock>, tick: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            lock,
            tick,
        }
    }

    pub fn register(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Runs one job unless another process holds its lock
    ///
    /// Returns `None` when the run was skipped.
    pub async fn run_job(lock: &dyn TaskLock, job: &dyn ScheduledJob) -> Result<Option<usize>, ComplianceError> {
        if !job.exclusive() {
            return job.run().await.map(Some);
        }
        if !lock.try_lock(job.name()).await? {
            debug!(task = job.name(), "task lock held elsewhere, skipping run");
            return Ok(None);
        }
        let result = job.run().await;
        if let Err(e) = lock.unlock(job.name()).await {
            error!(task = job.name(), error = %e, "failed to release task lock");
        }
        result.map(Some)
    }

    /// Spawns the tick loop
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(RwLock::new(true));
        let running_clone = running.clone();
        let jobs = self.jobs;
        let lock = self.lock;
        let tick = self.tick;

        let task = tokio::spawn(async move {
            let mut timer = interval(tick);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(jobs = jobs.len(), tick_secs = tick.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        if !*running_clone.read().await {
                            continue;
                        }
                        for job in &jobs {
                            match Self::run_job(lock.as_ref(), job.as_ref()).await {
                                Ok(Some(count)) if count > 0 => info!(task = job.name(), count, "job run finished"),
                                Ok(_) => {}
                                Err(e) => error!(task = job.name(), error = %e, "job run failed"),
                            }
                        }
                    }
                }
            }

            info!("scheduler stopped");
        });

        SchedulerHandle {
            shutdown_tx,
            running,
            task,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs.iter().map(|j| j.name().to_string()).collect::<Vec<_>>())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

/// Handle to a started scheduler
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the loop and waits for the in-flight run to finish
    pub async fn shutdown(self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }

    pub async fn pause(&self) {
        *self.running.write().await = false;
    }

    pub async fn resume(&self) {
        *self.running.write().await = true;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MemoryTaskLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        exclusive: bool,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn exclusive(&self) -> bool {
            self.exclusive
        }

        async fn run(&self) -> Result<usize, ComplianceError> {
            Ok(self.runs.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[tokio::test]
    async fn test_held_lock_skips_run() {
        let lock = MemoryTaskLock::new();
        let job = CountingJob { runs: AtomicUsize::new(0), exclusive: true };

        assert!(lock.try_lock("counting").await.unwrap());
        assert_eq!(Scheduler::run_job(&lock, &job).await.unwrap(), None);
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        lock.unlock("counting").await.unwrap();
        assert_eq!(Scheduler::run_job(&lock, &job).await.unwrap(), Some(1));
        assert!(!lock.is_held("counting").await);
    }

    #[tokio::test]
    async fn test_shared_job_ignores_lock() {
        let lock = MemoryTaskLock::new();
        let job = CountingJob { runs: AtomicUsize::new(0), exclusive: false };
        assert!(lock.try_lock("counting").await.unwrap());
        assert_eq!(Scheduler::run_job(&lock, &job).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_shuts_down() {
        let job = Arc::new(CountingJob { runs: AtomicUsize::new(0), exclusive: true });
        let handle = Scheduler::new(Arc::new(MemoryTaskLock::new()), Duration::from_millis(10))
            .register(job.clone())
            .start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_running().await);
        handle.shutdown().await;
        assert!(job.runs.load(Ordering::SeqCst) >= 1);
    }
}
