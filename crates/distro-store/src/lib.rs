//! Job store abstraction.
//!
//! This crate provides a trait-based abstraction for persisting
//! [`SyncJob`](distro_types::SyncJob) records, with a filesystem-backed
//! implementation for production use and an in-memory implementation for
//! tests and the dry-run CLI path. Both honor the same pagination,
//! compare-and-set transition, and retention-eviction contract (§4.4, §4.7).
//!
//! # Example
//!
//! ```
//! use distro_store::{JobStore, MemStore, JobFilter};
//! use distro_types::{Channel, ContentKind, JobStatus, SyncJob};
//! use chrono::Utc;
//! use std::collections::BTreeMap;
//!
//! let store = MemStore::new();
//! let job = SyncJob {
//!     job_id: "job-1".to_string(),
//!     correlation_id: "corr-1".to_string(),
//!     document_id: "doc-1".to_string(),
//!     channels: vec![Channel::Email],
//!     status: JobStatus::Pending,
//!     created_at: Utc::now(),
//!     scheduled_for: None,
//!     started_at: None,
//!     completed_at: None,
//!     results: BTreeMap::new(),
//!     errors: Vec::new(),
//!     metadata: BTreeMap::new(),
//!     dry_run: false,
//!     content_hash: "abc".to_string(),
//!     content_type: ContentKind::Update,
//!     template: None,
//! };
//! store.insert(job).expect("insert");
//! assert!(store.get("job-1").expect("get").is_some());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use distro_types::{JobStatus, SyncJob};
use thiserror::Error;

/// Minimum and maximum retention window for terminal jobs (§4.7): a job
/// younger than the minimum is never evicted even under pressure; one older
/// than the maximum is always eligible.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub min_retention: chrono::Duration,
    pub max_retention: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_retention: chrono::Duration::hours(24),
            max_retention: chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {job_id} is in state {actual:?}, expected {expected:?}")]
    StateMismatch {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Pagination and status filtering for job listings (§6.1 `list_sync_jobs`).
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Storage abstraction for `SyncJob` records, independent of backend.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: SyncJob) -> Result<()>;

    fn get(&self, job_id: &str) -> Result<Option<SyncJob>>;

    /// List jobs matching `filter`, ordered by `created_at` ascending, with
    /// offset/limit pagination applied after filtering.
    fn list(&self, filter: JobFilter) -> Result<Vec<SyncJob>>;

    /// Atomically move a job from `expected` to a new state, applying
    /// `patch` to the in-place record. Fails with
    /// `StoreError::StateMismatch` if the job's current status no longer
    /// matches `expected` — the caller lost a race (§4.7: "transitions are
    /// compare-and-set, not blind overwrite").
    fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        patch: Box<dyn FnOnce(&mut SyncJob) + Send>,
    ) -> Result<SyncJob, StoreError>;

    /// Remove terminal jobs older than the policy's max retention, and
    /// opportunistically remove terminal jobs older than min retention when
    /// `pressure` requests freeing space. Returns the number evicted.
    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>, pressure: bool) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn apply_filter(mut jobs: Vec<SyncJob>, filter: &JobFilter) -> Vec<SyncJob> {
    jobs.sort_by_key(|j| j.created_at);
    let filtered: Vec<SyncJob> = jobs
        .into_iter()
        .filter(|j| filter.status.is_none_or(|s| j.status == s))
        .collect();

    let start = filter.offset.min(filtered.len());
    let end = match filter.limit {
        Some(limit) => (start + limit).min(filtered.len()),
        None => filtered.len(),
    };
    filtered[start..end].to_vec()
}

fn evictable(job: &SyncJob, policy: &RetentionPolicy, now: DateTime<Utc>, pressure: bool) -> bool {
    if !job.status.is_terminal() {
        return false;
    }
    let age = now.signed_duration_since(job.created_at);
    if age >= policy.max_retention {
        return true;
    }
    pressure && age >= policy.min_retention
}

/// In-memory job store, guarded by a single mutex. Used by the dry-run CLI
/// path and by tests that don't need filesystem durability.
#[derive(Default)]
pub struct MemStore {
    jobs: Mutex<BTreeMap<String, SyncJob>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemStore {
    fn insert(&self, job: SyncJob) -> Result<()> {
        self.jobs.lock().expect("mem store mutex poisoned").insert(job.job_id.clone(), job);
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<SyncJob>> {
        Ok(self.jobs.lock().expect("mem store mutex poisoned").get(job_id).cloned())
    }

    fn list(&self, filter: JobFilter) -> Result<Vec<SyncJob>> {
        let jobs = self.jobs.lock().expect("mem store mutex poisoned");
        Ok(apply_filter(jobs.values().cloned().collect(), &filter))
    }

    fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        patch: Box<dyn FnOnce(&mut SyncJob) + Send>,
    ) -> Result<SyncJob, StoreError> {
        let mut jobs = self.jobs.lock().expect("mem store mutex poisoned");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.status != expected {
            return Err(StoreError::StateMismatch {
                job_id: job_id.to_string(),
                expected,
                actual: job.status,
            });
        }
        patch(job);
        Ok(job.clone())
    }

    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>, pressure: bool) -> Result<usize> {
        let mut jobs = self.jobs.lock().expect("mem store mutex poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| !evictable(job, policy, now, pressure));
        Ok(before - jobs.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.jobs.lock().expect("mem store mutex poisoned").len())
    }
}

/// Filesystem-backed job store. Each job is a single JSON file named by
/// `job_id`, written atomically (write to `.tmp`, `fsync`, rename) the same
/// way job receipts are persisted elsewhere in the pipeline.
pub struct FileStore {
    dir: PathBuf,
    index: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            index: Mutex::new(()),
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create job store dir {}", self.dir.display()))
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn atomic_write_json(&self, path: &Path, job: &SyncJob) -> Result<()> {
        self.ensure_dir()?;
        let tmp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(job).context("failed to serialize job")?;

        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            use std::io::Write;
            file.write_all(content.as_bytes())
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to fsync {}", tmp_path.display()))?;
        }

        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))?;

        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    fn read_job(&self, path: &Path) -> Result<Option<SyncJob>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let job: SyncJob = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse job JSON from {}", path.display()))?;
        Ok(Some(job))
    }

    fn all_jobs(&self) -> Result<Vec<SyncJob>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read dir {}", self.dir.display()))?
        {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(job) = self.read_job(&entry.path())?
            {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

impl JobStore for FileStore {
    fn insert(&self, job: SyncJob) -> Result<()> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        let path = self.path_for(&job.job_id);
        self.atomic_write_json(&path, &job)
    }

    fn get(&self, job_id: &str) -> Result<Option<SyncJob>> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        self.read_job(&self.path_for(job_id))
    }

    fn list(&self, filter: JobFilter) -> Result<Vec<SyncJob>> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        Ok(apply_filter(self.all_jobs()?, &filter))
    }

    fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        patch: Box<dyn FnOnce(&mut SyncJob) + Send>,
    ) -> Result<SyncJob, StoreError> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        let path = self.path_for(job_id);
        let mut job = self
            .read_job(&path)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        if job.status != expected {
            return Err(StoreError::StateMismatch {
                job_id: job_id.to_string(),
                expected,
                actual: job.status,
            });
        }

        patch(&mut job);
        self.atomic_write_json(&path, &job)?;
        Ok(job)
    }

    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>, pressure: bool) -> Result<usize> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        let mut evicted = 0;
        for job in self.all_jobs()? {
            if evictable(&job, policy, now, pressure) {
                let path = self.path_for(&job.job_id);
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("failed to evict {}", path.display()))?;
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }

    fn len(&self) -> Result<usize> {
        let _guard = self.index.lock().expect("file store mutex poisoned");
        Ok(self.all_jobs()?.len())
    }
}
