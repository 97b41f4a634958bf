//! Admission control, time-based release, single-flight, and per-channel
//! rate limiting (§4.5).
//!
//! The scheduler owns the single-flight lock and the per-channel rate
//! buckets; the orchestrator owns the actual per-channel publish calls. A
//! job with `scheduled_for` in the future is held by a timer thread until
//! due; a job without one is released immediately, subject to admission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use distro_store::{JobStore, StoreError};
use distro_types::{Channel, JobStatus, SyncJob};

use crate::lock::{Acquisition, SingleFlightLock};
use crate::ratelimit::RateBucket;

/// Outcome of submitting a job to the scheduler.
pub enum Admission {
    /// The job was newly admitted and is now `scheduled` (or immediately
    /// `in_progress` if due now).
    Admitted,
    /// A job with identical fingerprint and content hash is already
    /// in-flight; the caller should use `existing_job_id` instead.
    Deduplicated { existing_job_id: String },
    /// A job with identical fingerprint but divergent content is already
    /// in-flight; this job is queued and will be released once the first
    /// finishes (the caller still receives its own job id back).
    Queued,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    single_flight: SingleFlightLock,
    rate_buckets: Mutex<HashMap<Channel, Arc<RateBucket>>>,
    rate_wait_budget: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            single_flight: SingleFlightLock::new(),
            rate_buckets: Mutex::new(HashMap::new()),
            rate_wait_budget: Duration::from_secs(60),
        }
    }

    pub fn configure_channel_rate(&self, channel: Channel, rate_per_hour: u64, batch_size: usize) {
        self.rate_buckets
            .lock()
            .unwrap()
            .insert(channel, Arc::new(RateBucket::new(rate_per_hour, batch_size)));
    }

    pub fn rate_bucket(&self, channel: Channel) -> Option<Arc<RateBucket>> {
        self.rate_buckets.lock().unwrap().get(&channel).cloned()
    }

    /// Whether the channel has budget to run right now, waiting up to the
    /// scheduler's rate-limit wait budget (60s by default, §4.5).
    pub fn admit_channel(&self, channel: Channel) -> bool {
        match self.rate_bucket(channel) {
            Some(bucket) => bucket.acquire_within(self.rate_wait_budget),
            None => true,
        }
    }

    /// Submits `job`. A job with `scheduled_for` in the future is persisted
    /// as `scheduled` and left for `release_due` to pick up later; a job due
    /// now attempts single-flight admission immediately.
    pub fn submit(&self, mut job: SyncJob) -> Result<(SyncJob, Admission), StoreError> {
        let due_now = job.scheduled_for.is_none_or(|when| when <= Utc::now());

        if !due_now {
            job.status = JobStatus::Scheduled;
            self.store.insert(job.clone())?;
            return Ok((job, Admission::Admitted));
        }

        let fingerprint = job.fingerprint();
        match self.single_flight.acquire(&fingerprint, &job.job_id, &job.content_hash) {
            Acquisition::Acquired => {
                job.status = JobStatus::Scheduled;
                self.store.insert(job.clone())?;
                Ok((job, Admission::Admitted))
            }
            Acquisition::Deduplicate { existing_job_id } => {
                Ok((job, Admission::Deduplicated { existing_job_id }))
            }
            Acquisition::Queued { .. } => {
                job.status = JobStatus::Scheduled;
                self.store.insert(job.clone())?;
                Ok((job, Admission::Queued))
            }
        }
    }

    /// Releases every scheduled job whose `scheduled_for` has elapsed (or
    /// who has none), transitioning it to `in_progress` via the store's
    /// compare-and-set transition. Returns the jobs now ready to run.
    pub fn release_due(&self) -> Vec<SyncJob> {
        let now = Utc::now();
        let scheduled = self
            .store
            .list(distro_store::JobFilter::default().with_status(JobStatus::Scheduled))
            .unwrap_or_default();

        let mut released = Vec::new();
        for job in scheduled {
            if job.scheduled_for.is_some_and(|when| when > now) {
                continue;
            }
            let fingerprint = job.fingerprint();
            if !matches!(
                self.single_flight
                    .acquire(&fingerprint, &job.job_id, &job.content_hash),
                Acquisition::Acquired
            ) {
                continue;
            }
            let job_id = job.job_id.clone();
            match self.store.transition(
                &job_id,
                JobStatus::Scheduled,
                Box::new(|job| job.status = JobStatus::InProgress),
            ) {
                Ok(job) => released.push(job),
                Err(_) => self.single_flight.release(&fingerprint, &job_id),
            }
        }
        released
    }

    /// Releases the fingerprint a finished job held, so the next queued job
    /// with the same fingerprint can be admitted.
    pub fn finish(&self, job: &SyncJob) {
        self.single_flight.release(&job.fingerprint(), &job.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distro_store::MemStore;
    use distro_types::ContentKind;
    use std::collections::BTreeMap;

    fn job(id: &str, content_hash: &str) -> SyncJob {
        SyncJob {
            job_id: id.into(),
            correlation_id: format!("corr-{id}"),
            document_id: "doc-1".into(),
            channels: vec![Channel::Email],
            status: JobStatus::Pending,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            results: BTreeMap::new(),
            errors: vec![],
            metadata: BTreeMap::new(),
            dry_run: false,
            content_hash: content_hash.into(),
            content_type: ContentKind::Update,
            template: None,
        }
    }

    #[test]
    fn immediate_job_is_admitted_and_stored_as_scheduled() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        let (stored, admission) = scheduler.submit(job("job-1", "hash-1")).unwrap();
        assert!(matches!(admission, Admission::Admitted));
        assert_eq!(stored.status, JobStatus::Scheduled);
    }

    #[test]
    fn duplicate_fingerprint_with_same_hash_deduplicates() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        scheduler.submit(job("job-1", "hash-1")).unwrap();
        let (_, admission) = scheduler.submit(job("job-2", "hash-1")).unwrap();
        match admission {
            Admission::Deduplicated { existing_job_id } => assert_eq!(existing_job_id, "job-1"),
            _ => panic!("expected dedup"),
        }
    }

    #[test]
    fn duplicate_fingerprint_with_different_hash_queues() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        scheduler.submit(job("job-1", "hash-1")).unwrap();
        let (_, admission) = scheduler.submit(job("job-2", "hash-2")).unwrap();
        assert!(matches!(admission, Admission::Queued));
    }

    #[test]
    fn release_due_transitions_scheduled_jobs_to_in_progress() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        scheduler.submit(job("job-1", "hash-1")).unwrap();
        let released = scheduler.release_due();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].status, JobStatus::InProgress);
    }

    #[test]
    fn finishing_a_job_frees_its_fingerprint_for_the_queued_one() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        let (first, _) = scheduler.submit(job("job-1", "hash-1")).unwrap();
        scheduler.submit(job("job-2", "hash-2")).unwrap();
        scheduler.finish(&first);
        let released = scheduler.release_due();
        assert!(released.iter().any(|j| j.job_id == "job-2"));
    }

    #[test]
    fn channel_rate_limit_blocks_when_exhausted() {
        let scheduler = Scheduler::new(Arc::new(MemStore::new()));
        scheduler.configure_channel_rate(Channel::Email, 1, 1);
        assert!(scheduler.admit_channel(Channel::Email));
    }
}
