//! Job scheduler infrastructure for background tasks.
//!
//! Every job owns a running flag. A tick or a manual trigger that finds the
//! flag set is skipped, never queued. Each execution runs in its own task, so
//! a panicking job loses that run only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// When a job runs.
#[derive(Debug, Clone)]
pub enum JobFrequency {
    /// Fixed interval, first run one interval after start.
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl JobFrequency {
    /// Time until the next run after `now`. `None` if the schedule has no
    /// future occurrence.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            JobFrequency::Every(interval) => Some(*interval),
            JobFrequency::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            JobFrequency::Every(interval) => format!("every {}s", interval.as_secs()),
            JobFrequency::Cron(schedule) => schedule.to_string(),
        }
    }
}

/// Trait for implementing background jobs.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging and the admin API).
    fn name(&self) -> &'static str;

    fn frequency(&self) -> JobFrequency;

    /// Execute the job. Returns Ok(()) on success, Err with message on failure.
    async fn execute(&self) -> Result<(), String>;
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub schedule: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<JobRun>,
}

/// Result of a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNow {
    Started,
    AlreadyRunning,
    Unknown,
}

struct JobSlot {
    job: Arc<dyn Job>,
    frequency: JobFrequency,
    running: AtomicBool,
    last_run: RwLock<Option<JobRun>>,
}

/// Holds a slot's running flag and clears it on drop, even if the job panics.
struct RunningGuard(Arc<JobSlot>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl JobSlot {
    fn try_acquire(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(Arc::clone(self)))
    }

    async fn run(&self, _guard: RunningGuard) {
        let name = self.job.name();
        let start = Instant::now();
        info!(job = name, "Job starting");

        let result = self.job.execute().await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(()) => info!(job = name, elapsed_ms = elapsed_ms, "Job completed successfully"),
            Err(e) => error!(job = name, elapsed_ms = elapsed_ms, error = %e, "Job failed"),
        }

        *self.last_run.write().await = Some(JobRun {
            finished_at: Utc::now(),
            elapsed_ms,
            success: result.is_ok(),
            error: result.err(),
        });
    }

    /// Runs one execution in a separate task and waits for it.
    async fn run_isolated(self: Arc<Self>, guard: RunningGuard) {
        let name = self.job.name();
        let start = Instant::now();
        let slot = Arc::clone(&self);
        let Err(e) = tokio::spawn(async move { slot.run(guard).await }).await else {
            return;
        };

        if !e.is_panic() {
            warn!(job = name, "Job execution cancelled");
            return;
        }
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        error!(job = name, elapsed_ms = elapsed_ms, "Job panicked");
        *self.last_run.write().await = Some(JobRun {
            finished_at: Utc::now(),
            elapsed_ms,
            success: false,
            error: Some("Job panicked".to_string()),
        });
    }
}

/// Background job scheduler.
pub struct JobScheduler {
    slots: Vec<Arc<JobSlot>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            slots: Vec::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job with the scheduler.
    pub fn register<J: Job + 'static>(&mut self, job: J) {
        let frequency = job.frequency();
        self.slots.push(Arc::new(JobSlot {
            job: Arc::new(job),
            frequency,
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }));
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|slot| slot.job.name()).collect()
    }

    /// Spawns one loop per registered job.
    pub async fn start(&self) {
        info!("Starting job scheduler with {} jobs", self.slots.len());
        let mut handles = self.handles.lock().await;

        for slot in &self.slots {
            let slot = Arc::clone(slot);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                let name = slot.job.name();
                info!(job = name, schedule = %slot.frequency.describe(), "Job scheduled");

                loop {
                    let Some(delay) = slot.frequency.next_delay(Utc::now()) else {
                        warn!(job = name, "Schedule has no upcoming runs");
                        break;
                    };

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            match slot.try_acquire() {
                                Some(guard) => Arc::clone(&slot).run_isolated(guard).await,
                                None => info!(job = name, "Job still running, tick skipped"),
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                info!(job = name, "Job shutting down");
                                break;
                            }
                        }
                    }
                }
            }));
        }
    }

    /// Runs a job now in the background unless it is already in flight.
    pub fn run_now(&self, name: &str) -> RunNow {
        let Some(slot) = self.slots.iter().find(|slot| slot.job.name() == name) else {
            return RunNow::Unknown;
        };

        match slot.try_acquire() {
            Some(guard) => {
                let slot = Arc::clone(slot);
                info!(job = slot.job.name(), "Job triggered manually");
                tokio::spawn(slot.run_isolated(guard));
                RunNow::Started
            }
            None => {
                info!(job = slot.job.name(), "Manual trigger skipped, job still running");
                RunNow::AlreadyRunning
            }
        }
    }

    pub async fn status(&self) -> Vec<JobStatus> {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            statuses.push(JobStatus {
                name: slot.job.name(),
                schedule: slot.frequency.describe(),
                running: slot.running.load(Ordering::Acquire),
                last_run: slot.last_run.read().await.clone(),
            });
        }
        statuses
    }

    /// Signals every job loop to stop. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        self.shutdown_tx.send_replace(true);
    }

    /// Waits for the job loops to exit, up to `timeout`.
    pub async fn wait_for_shutdown(&self, timeout: Duration) {
        info!("Waiting for jobs to complete (timeout: {:?})", timeout);
        let handles = std::mem::take(&mut *self.handles.lock().await);

        let shutdown_future = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Job task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All jobs completed gracefully"),
            Err(_) => warn!("Job shutdown timed out after {:?}", timeout),
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_cron;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        release: Arc<Notify>,
        block: bool,
        frequency: JobFrequency,
    }

    impl CountingJob {
        fn new(frequency: JobFrequency) -> Self {
            Self {
                runs: Arc::new(AtomicUsize::new(0)),
                release: Arc::new(Notify::new()),
                block: false,
                frequency,
            }
        }
    }

    #[async_trait::async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn frequency(&self) -> JobFrequency {
            self.frequency.clone()
        }

        async fn execute(&self) -> Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.block {
                self.release.notified().await;
            }
            Err("boom".to_string())
        }
    }

    /// Panics on its first run, succeeds afterwards.
    struct FlakyJob {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Job for FlakyJob {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn frequency(&self) -> JobFrequency {
            JobFrequency::Every(Duration::from_secs(10))
        }

        async fn execute(&self) -> Result<(), String> {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails hard");
            }
            Ok(())
        }
    }

    #[test]
    fn test_cron_next_delay() {
        let frequency = JobFrequency::Cron(Box::new(parse_cron("0 3 * * *").unwrap()));
        let now = "2026-01-01T02:59:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(frequency.next_delay(now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_interval_next_delay() {
        let frequency = JobFrequency::Every(Duration::from_secs(300));
        assert_eq!(frequency.next_delay(Utc::now()), Some(Duration::from_secs(300)));
        assert_eq!(frequency.describe(), "every 300s");
    }

    #[tokio::test]
    async fn test_run_now_unknown_job() {
        let scheduler = JobScheduler::new();
        assert_eq!(scheduler.run_now("missing"), RunNow::Unknown);
    }

    #[tokio::test]
    async fn test_run_now_skips_while_running() {
        let mut job = CountingJob::new(JobFrequency::Every(Duration::from_secs(3600)));
        job.block = true;
        let runs = Arc::clone(&job.runs);
        let release = Arc::clone(&job.release);

        let mut scheduler = JobScheduler::new();
        scheduler.register(job);

        assert_eq!(scheduler.run_now("counting"), RunNow::Started);
        while runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.run_now("counting"), RunNow::AlreadyRunning);
        assert!(scheduler.status().await[0].running);

        release.notify_one();
        loop {
            let status = scheduler.status().await;
            if let Some(run) = &status[0].last_run {
                assert!(!run.success);
                assert_eq!(run.error.as_deref(), Some("boom"));
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_keeps_its_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new();
        scheduler.register(FlakyJob {
            runs: Arc::clone(&runs),
        });
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let status = scheduler.status().await;
        assert!(!status[0].running);
        assert_eq!(
            status[0].last_run.as_ref().and_then(|run| run.error.as_deref()),
            Some("Job panicked")
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.status().await[0].last_run.as_ref().unwrap().success);

        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_job_runs_until_shutdown() {
        let job = CountingJob::new(JobFrequency::Every(Duration::from_secs(10)));
        let runs = Arc::clone(&job.runs);

        let mut scheduler = JobScheduler::new();
        scheduler.register(job);
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(25)).await;
        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(2)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.job_names(), vec!["counting"]);
    }
}
