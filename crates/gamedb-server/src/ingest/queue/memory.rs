//! Process-local job queue for tests and single-node development

use super::{
    ClaimedJob, Enqueued, JobOutcome, JobQueue, JobRecord, JobRequest, JobStatus, QueueError,
    RetryDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<JobRecord>>,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn is_active(job: &JobRecord) -> bool {
    matches!(job.status, JobStatus::Pending | JobStatus::Processing)
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.jobs.lock().await.clone()
    }

    pub async fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.status == status)
            .count()
    }

    /// Make every pending job due now.
    pub async fn make_all_due(&self) {
        let now = Utc::now();
        for job in self.jobs.lock().await.iter_mut() {
            if job.status == JobStatus::Pending {
                job.run_at = now;
            }
        }
    }

    /// Expire every lease, as if the owning workers had died.
    pub async fn expire_leases(&self) {
        let now = Utc::now();
        for job in self.jobs.lock().await.iter_mut() {
            if job.status == JobStatus::Processing {
                job.locked_until = Some(now);
            }
        }
    }
}

fn leased_to<'a>(
    jobs: &'a mut [JobRecord],
    id: Uuid,
    worker_id: &str,
) -> Result<&'a mut JobRecord, QueueError> {
    jobs.iter_mut()
        .find(|job| {
            job.id == id
                && job.status == JobStatus::Processing
                && job.locked_by.as_deref() == Some(worker_id)
        })
        .ok_or(QueueError::LeaseLost(id))
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, request: JobRequest) -> Result<Enqueued, QueueError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(key) = &request.dedupe_key {
            let duplicate = jobs.iter().any(|job| {
                is_active(job)
                    && job.operation == request.operation
                    && job.dedupe_key.as_ref() == Some(key)
            });
            if duplicate {
                return Ok(Enqueued::Duplicate);
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        jobs.push(JobRecord {
            id,
            operation: request.operation,
            params: request.params,
            dedupe_key: request.dedupe_key,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts,
            run_at: after(now, request.delay),
            locked_by: None,
            locked_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        });

        Ok(Enqueued::Created(id))
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ClaimedJob>, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();

        let due = jobs
            .iter_mut()
            .filter(|job| match job.status {
                JobStatus::Pending => job.run_at <= now,
                JobStatus::Processing => job.locked_until.is_some_and(|until| until <= now),
                _ => false,
            })
            .min_by_key(|job| job.run_at);

        Ok(due.map(|job| {
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.locked_by = Some(worker_id.to_string());
            job.locked_until = Some(after(now, lease));
            job.updated_at = now;
            ClaimedJob {
                id: job.id,
                operation: job.operation.clone(),
                params: job.params.clone(),
                attempts: job.attempts,
                max_attempts: job.max_attempts,
            }
        }))
    }

    async fn complete(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = leased_to(&mut jobs, id, worker_id)?;
        let now = Utc::now();

        job.status = outcome.status();
        if let Some(error) = outcome.error() {
            job.last_error = Some(error.to_string());
        }
        job.locked_by = None;
        job.locked_until = None;
        job.finished_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        backoff: Duration,
    ) -> Result<RetryDecision, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = leased_to(&mut jobs, id, worker_id)?;
        let now = Utc::now();

        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.locked_until = None;
        job.updated_at = now;

        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            Ok(RetryDecision::Exhausted)
        } else {
            job.status = JobStatus::Pending;
            job.run_at = after(now, backoff);
            Ok(RetryDecision::Scheduled)
        }
    }

    async fn release(&self, id: Uuid, worker_id: &str, delay: Duration) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = leased_to(&mut jobs, id, worker_id)?;
        let now = Utc::now();

        job.status = JobStatus::Pending;
        job.attempts = (job.attempts - 1).max(0);
        job.run_at = after(now, delay);
        job.locked_by = None;
        job.locked_until = None;
        job.updated_at = now;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.jobs.lock().await.iter().find(|job| job.id == id).cloned())
    }

    async fn has_active(&self, operation: &str, dedupe_key: &str) -> Result<bool, QueueError> {
        Ok(self.jobs.lock().await.iter().any(|job| {
            is_active(job)
                && job.operation == operation
                && job.dedupe_key.as_deref() == Some(dedupe_key)
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    fn request(key: &str) -> JobRequest {
        JobRequest::new("import-game", json!({ "handle": key })).with_dedupe_key(key)
    }

    #[tokio::test]
    async fn test_delayed_job_is_not_claimed_early() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(request("a").with_delay(Duration::from_secs(30)))
            .await
            .unwrap();

        assert!(queue.claim("w1", LEASE).await.unwrap().is_none());
        queue.make_all_due().await;
        assert!(queue.claim("w1", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dedupe_only_applies_to_active_jobs() {
        let queue = MemoryJobQueue::new();
        assert!(matches!(queue.enqueue(request("a")).await.unwrap(), Enqueued::Created(_)));
        assert_eq!(queue.enqueue(request("a")).await.unwrap(), Enqueued::Duplicate);

        let job = queue.claim("w1", LEASE).await.unwrap().unwrap();
        queue.complete(job.id, "w1", &JobOutcome::Succeeded).await.unwrap();

        assert!(!queue.has_active("import-game", "a").await.unwrap());
        assert!(matches!(queue.enqueue(request("a")).await.unwrap(), Enqueued::Created(_)));
    }

    #[tokio::test]
    async fn test_claimed_job_is_not_delivered_twice() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(request("a")).await.unwrap();

        let first = queue.claim("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);
        assert!(queue.claim("w2", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(request("a")).await.unwrap();
        let first = queue.claim("w1", LEASE).await.unwrap().unwrap();

        queue.expire_leases().await;
        let second = queue.claim("w2", LEASE).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        // the original worker no longer owns it
        assert!(matches!(
            queue.complete(first.id, "w1", &JobOutcome::Succeeded).await,
            Err(QueueError::LeaseLost(_))
        ));
        queue.complete(second.id, "w2", &JobOutcome::Succeeded).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let queue = MemoryJobQueue::new();
        let Enqueued::Created(id) = queue
            .enqueue(request("a").with_max_attempts(2))
            .await
            .unwrap()
        else {
            panic!("expected a new job");
        };

        let job = queue.claim("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(
            queue.retry(job.id, "w1", "store down", Duration::ZERO).await.unwrap(),
            RetryDecision::Scheduled
        );

        let job = queue.claim("w1", LEASE).await.unwrap().unwrap();
        assert!(job.is_final_attempt());
        assert_eq!(
            queue.retry(job.id, "w1", "store down", Duration::ZERO).await.unwrap(),
            RetryDecision::Exhausted
        );

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("store down"));
        assert!(record.finished_at.is_some());
        assert!(queue.claim("w1", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_does_not_spend_an_attempt() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(request("a")).await.unwrap();

        let job = queue.claim("w1", LEASE).await.unwrap().unwrap();
        queue.release(job.id, "w1", Duration::ZERO).await.unwrap();

        let again = queue.claim("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_failed_outcome_records_error() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(request("a")).await.unwrap();
        let job = queue.claim("w1", LEASE).await.unwrap().unwrap();

        queue
            .complete(job.id, "w1", &JobOutcome::Failed("bad json".into()))
            .await
            .unwrap();

        let record = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("bad json"));
        assert_eq!(queue.count_with_status(JobStatus::Failed).await, 1);
    }
}
