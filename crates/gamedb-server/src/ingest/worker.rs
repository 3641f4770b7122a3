//! Worker pool draining the job queue
//!
//! Each worker loops: claim a due job, run its handler under a timeout,
//! record the outcome. Transient errors and timeouts go back to the queue with
//! exponential backoff; once the attempts are used up the handler is told to
//! abandon the job so it can clean up.

use super::error::IngestError;
use super::queue::{ClaimedJob, JobOutcome, JobQueue, QueueError, RetryDecision};
use crate::config::ImportConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Upper bound for retry backoff
pub const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// Extra lease time beyond the job timeout before a job counts as lost
pub const LEASE_GRACE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn operation(&self) -> &'static str;

    /// `Ok` is terminal. `Err` with a transient error is retried.
    async fn run(&self, job: &ClaimedJob) -> Result<JobOutcome, IngestError>;

    /// Called once the job has failed for good without `run` reporting a
    /// terminal outcome (timeouts, exhausted retries).
    async fn abandon(&self, job: &ClaimedJob, reason: &str);
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    pub job_timeout: Duration,
    pub lease: Duration,
    pub poll_interval: Duration,
    pub retry_base: Duration,
    /// Delay before a job whose payload is busy is offered again
    pub busy_delay: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ImportConfig) -> Self {
        let job_timeout = config.job_timeout();
        Self {
            workers: config.workers,
            job_timeout,
            lease: job_timeout + LEASE_GRACE,
            poll_interval: config.poll_interval(),
            retry_base: config.retry_base(),
            busy_delay: config.retry_base(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

/// `base * 2^(attempt - 1)`, capped at [`MAX_BACKOFF`]
pub fn backoff_for(base: Duration, attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 20) as u32;
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

fn worker_name(index: usize) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}-{}", host, std::process::id(), index)
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, settings: WorkerSettings) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            settings,
        }
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.operation(), handler);
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Start `settings.workers` worker tasks. They finish their current job
    /// and exit once `shutdown` becomes `true`.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.settings.workers, "Starting import workers");
        (0..self.settings.workers)
            .map(|index| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                let worker_id = worker_name(index);
                tokio::spawn(async move { pool.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id = %worker_id, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&worker_id).await {
                Ok(true) => continue,
                Ok(false) => {},
                Err(e) => error!(worker_id = %worker_id, error = %e, "Failed to poll job queue"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
                _ = tokio::time::sleep(self.settings.poll_interval) => {},
            }
        }

        debug!(worker_id = %worker_id, "Worker stopped");
    }

    /// Claim and run at most one job. Returns whether a job was found.
    pub async fn run_once(&self, worker_id: &str) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim(worker_id, self.settings.lease).await? else {
            return Ok(false);
        };

        let span = info_span!(
            "job",
            job_id = %job.id,
            operation = %job.operation,
            attempt = job.attempts,
            worker_id = %worker_id
        );
        self.execute(worker_id, job).instrument(span).await?;
        Ok(true)
    }

    /// Run due jobs until none is left. Jobs scheduled in the future are not
    /// waited for.
    pub async fn drain(&self, worker_id: &str) -> Result<usize, QueueError> {
        let mut processed = 0;
        while self.run_once(worker_id).await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn execute(&self, worker_id: &str, job: ClaimedJob) -> Result<(), QueueError> {
        let Some(handler) = self.handlers.get(job.operation.as_str()).cloned() else {
            error!("No handler registered for operation");
            let outcome = JobOutcome::Failed(format!("unknown operation '{}'", job.operation));
            return self.finish(worker_id, &job, &outcome).await;
        };

        if job.is_overdue() {
            let reason = "lease expired on the final attempt";
            handler.abandon(&job, reason).await;
            return self
                .finish(worker_id, &job, &JobOutcome::Failed(reason.to_string()))
                .await;
        }

        match tokio::time::timeout(self.settings.job_timeout, handler.run(&job)).await {
            Ok(Ok(outcome)) => {
                match &outcome {
                    JobOutcome::Succeeded => info!("Job succeeded"),
                    JobOutcome::Failed(reason) => warn!(reason = %reason, "Job failed"),
                }
                self.finish(worker_id, &job, &outcome).await
            },
            Ok(Err(IngestError::Busy(handle))) => {
                debug!(handle = %handle, "Payload busy, releasing job");
                self.queue
                    .release(job.id, worker_id, self.settings.busy_delay)
                    .await
            },
            Ok(Err(e)) if !e.is_transient() => {
                let reason = e.to_string();
                error!(reason = %reason, "Job failed permanently");
                handler.abandon(&job, &reason).await;
                self.finish(worker_id, &job, &JobOutcome::Failed(reason)).await
            },
            Ok(Err(e)) => self.retry(worker_id, handler.as_ref(), &job, &e.to_string()).await,
            Err(_) => {
                let reason = format!("timed out after {:?}", self.settings.job_timeout);
                self.retry(worker_id, handler.as_ref(), &job, &reason).await
            },
        }
    }

    async fn retry(
        &self,
        worker_id: &str,
        handler: &dyn JobHandler,
        job: &ClaimedJob,
        reason: &str,
    ) -> Result<(), QueueError> {
        let backoff = backoff_for(self.settings.retry_base, job.attempts);
        match self.queue.retry(job.id, worker_id, reason, backoff).await? {
            RetryDecision::Scheduled => {
                warn!(reason, ?backoff, "Job will be retried");
            },
            RetryDecision::Exhausted => {
                error!(reason, "Job failed after max attempts");
                handler.abandon(job, reason).await;
            },
        }
        Ok(())
    }

    async fn finish(
        &self,
        worker_id: &str,
        job: &ClaimedJob,
        outcome: &JobOutcome,
    ) -> Result<(), QueueError> {
        match self.queue.complete(job.id, worker_id, outcome).await {
            // another worker took over after our lease ran out
            Err(QueueError::LeaseLost(id)) => {
                warn!(job_id = %id, "Lease lost before completion");
                Ok(())
            },
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::queue::{Enqueued, JobRequest, JobStatus, MemoryJobQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Fails transiently `failures` times, then succeeds
    struct Flaky {
        failures: usize,
        runs: AtomicUsize,
        abandoned: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                runs: AtomicUsize::new(0),
                abandoned: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for Flaky {
        fn operation(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self, _job: &ClaimedJob) -> Result<JobOutcome, IngestError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                Err(IngestError::Storage(anyhow::anyhow!("store offline")))
            } else {
                Ok(JobOutcome::Succeeded)
            }
        }

        async fn abandon(&self, _job: &ClaimedJob, _reason: &str) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Sleepy;

    #[async_trait]
    impl JobHandler for Sleepy {
        fn operation(&self) -> &'static str {
            "sleepy"
        }

        async fn run(&self, _job: &ClaimedJob) -> Result<JobOutcome, IngestError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JobOutcome::Succeeded)
        }

        async fn abandon(&self, _job: &ClaimedJob, _reason: &str) {}
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            workers: 2,
            job_timeout: Duration::from_millis(50),
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(5),
            retry_base: Duration::ZERO,
            busy_delay: Duration::ZERO,
        }
    }

    async fn enqueue(queue: &MemoryJobQueue, operation: &str, max_attempts: i32) -> Uuid {
        match queue
            .enqueue(JobRequest::new(operation, serde_json::json!({})).with_max_attempts(max_attempts))
            .await
            .unwrap()
        {
            Enqueued::Created(id) => id,
            Enqueued::Duplicate => panic!("unexpected duplicate"),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_for(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_for(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_for(base, 4), Duration::from_secs(16));
        assert_eq!(backoff_for(base, 30), MAX_BACKOFF);
        assert_eq!(backoff_for(base, 0), base);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = Flaky::new(2);
        let pool = WorkerPool::new(queue.clone(), settings()).register(handler.clone());
        let id = enqueue(&queue, "flaky", 5).await;

        assert_eq!(pool.drain("w").await.unwrap(), 3);

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempts, 3);
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_abandoned() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = Flaky::new(usize::MAX);
        let pool = WorkerPool::new(queue.clone(), settings()).register(handler.clone());
        let id = enqueue(&queue, "flaky", 2).await;

        pool.drain("w").await.unwrap();

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let queue = Arc::new(MemoryJobQueue::new());
        let pool = WorkerPool::new(queue.clone(), settings()).register(Arc::new(Sleepy));
        let id = enqueue(&queue, "sleepy", 1).await;

        assert!(pool.run_once("w").await.unwrap());

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_job() {
        let queue = Arc::new(MemoryJobQueue::new());
        let pool = WorkerPool::new(queue.clone(), settings());
        let id = enqueue(&queue, "mystery", 3).await;

        pool.drain("w").await.unwrap();

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_spawned_workers_process_and_stop() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = Flaky::new(0);
        let pool = Arc::new(WorkerPool::new(queue.clone(), settings()).register(handler.clone()));
        for _ in 0..4 {
            enqueue(&queue, "flaky", 1).await;
        }

        let (tx, rx) = watch::channel(false);
        let workers = pool.spawn(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.count_with_status(JobStatus::Succeeded).await < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        for worker in workers {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(handler.runs.load(Ordering::SeqCst), 4);
    }
}
