//! Transport-agnostic external surface (§6.1): submit/get/list/cancel/retry
//! jobs, validate content, invalidate caches, report health. No HTTP
//! framework dependency lives here — a CLI or HTTP layer calls these
//! methods directly and serializes the results however it likes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use distro_cache::{CacheCoordinator, CacheStats, TierOutcome};
use distro_store::{JobFilter, JobStore, StoreError};
use distro_types::{
    compute_fingerprint, Channel, ContentKind, ContentSource, JobStatus, RawContent, SyncJob,
    ValidationIssue, ValidationWarning,
};
use uuid_like::new_id;

use crate::scheduler::{Admission, Scheduler};
use crate::validator::Validator;

/// Local, dependency-free random-ish id generator: a counter is enough
/// uniqueness for job/correlation ids without pulling in a uuid crate this
/// crate otherwise has no use for.
mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    pub fn new_id(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n:016x}")
    }
}

#[derive(Debug, Clone)]
pub struct SubmitSyncJobRequest {
    pub document_id: String,
    pub channels: Vec<Channel>,
    pub content_type: ContentKind,
    /// Per-job template override; takes precedence over any template
    /// resolved on the content item itself during rendering.
    pub template: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SubmitSyncJobResponse {
    pub job_id: String,
    pub correlation_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("conflict: fingerprint collision with divergent content")]
    Conflict,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("job not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

pub struct ListSyncJobsResponse {
    pub jobs: Vec<SyncJob>,
    pub total: usize,
}

pub struct ValidateContentResponse {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
    /// Derived fields (word count, computed reading time, resolved tone)
    /// surfaced back to the caller on a successful, non-strict validation.
    pub enhanced_metadata: Option<BTreeMap<String, String>>,
}

pub struct InvalidateCacheResponse {
    pub invalidated: usize,
    pub targets: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct CacheStatsResponse {
    pub stats: CacheStats,
    pub cache_targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Degraded(Vec<String>),
}

pub struct JobSurface {
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    cache: Arc<CacheCoordinator>,
    content_source: Arc<dyn ContentSource>,
    validator: Validator,
}

impl JobSurface {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<Scheduler>,
        cache: Arc<CacheCoordinator>,
        content_source: Arc<dyn ContentSource>,
        registered_channels: Vec<Channel>,
    ) -> Self {
        Self {
            store,
            scheduler,
            cache,
            content_source,
            validator: Validator::new(registered_channels),
        }
    }

    pub fn submit_sync_job(
        &self,
        request: SubmitSyncJobRequest,
    ) -> Result<SubmitSyncJobResponse, ApiError> {
        if request.channels.is_empty() {
            return Err(ApiError::InvalidRequest("channels must be non-empty".into()));
        }

        let raw: RawContent = self
            .content_source
            .fetch(&request.document_id)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let content_hash = content_hash_of(&raw);

        let now = Utc::now();
        let job = SyncJob {
            job_id: new_id("job"),
            correlation_id: new_id("corr"),
            document_id: request.document_id,
            channels: request.channels.clone(),
            status: JobStatus::Pending,
            created_at: now,
            scheduled_for: request.scheduled_for,
            started_at: None,
            completed_at: None,
            results: BTreeMap::new(),
            errors: vec![],
            metadata: request.metadata,
            dry_run: request.dry_run,
            content_hash,
            content_type: request.content_type,
            template: request.template,
        };

        let (stored, admission) = self
            .scheduler
            .submit(job)
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        let job_id = match admission {
            Admission::Admitted | Admission::Queued => stored.job_id.clone(),
            Admission::Deduplicated { existing_job_id } => existing_job_id,
        };

        let effective = if job_id == stored.job_id {
            stored
        } else {
            self.store
                .get(&job_id)
                .map_err(|e| ApiError::Unavailable(e.to_string()))?
                .ok_or_else(|| ApiError::NotFound(job_id.clone()))?
        };

        Ok(SubmitSyncJobResponse {
            job_id: effective.job_id,
            correlation_id: effective.correlation_id,
            status: effective.status,
            created_at: effective.created_at,
            scheduled_for: effective.scheduled_for,
        })
    }

    pub fn get_sync_job(&self, job_id: &str) -> Result<SyncJob, ApiError> {
        self.store
            .get(job_id)
            .map_err(|e| ApiError::Unavailable(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(job_id.to_string()))
    }

    pub fn list_sync_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<ListSyncJobsResponse, ApiError> {
        let mut filter = JobFilter::default().with_offset(offset);
        if let Some(status) = status {
            filter = filter.with_status(status);
        }
        if let Some(limit) = limit {
            filter = filter.with_limit(limit);
        }
        let jobs = self.store.list(filter).map_err(|e| ApiError::Unavailable(e.to_string()))?;
        let total = self.store.len().map_err(|e| ApiError::Unavailable(e.to_string()))?;
        Ok(ListSyncJobsResponse { jobs, total })
    }

    /// Sets a non-terminal job to `cancelled`. Terminal jobs are left
    /// unchanged and report `cancelled: false`.
    pub fn cancel_sync_job(&self, job_id: &str) -> Result<bool, ApiError> {
        let job = self.get_sync_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        let expected = job.status;
        match self.store.transition(
            job_id,
            expected,
            Box::new(|job| job.status = JobStatus::Cancelled),
        ) {
            Ok(_) => Ok(true),
            Err(StoreError::StateMismatch { .. }) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    /// Creates a new job with identical inputs to `job_id`; the old job is
    /// unchanged.
    pub fn retry_sync_job(&self, job_id: &str) -> Result<SubmitSyncJobResponse, ApiError> {
        let original = self.get_sync_job(job_id)?;
        self.submit_sync_job(SubmitSyncJobRequest {
            document_id: original.document_id,
            channels: original.channels,
            content_type: original.content_type,
            template: original.template,
            scheduled_for: None,
            dry_run: original.dry_run,
            metadata: original.metadata,
        })
    }

    /// The normative field name is `is_valid`, not `valid` (§6.1).
    ///
    /// `content_type` is injected as the draft's `kind` when the draft
    /// doesn't already carry one, so callers that have already classified
    /// the content don't have to duplicate it inside the JSON body.
    /// `strict` promotes warnings to issues: a draft that would otherwise
    /// validate with warnings comes back invalid instead.
    pub fn validate_content(
        &self,
        draft: &serde_json::Value,
        document_id: &str,
        content_type: ContentKind,
        strict: bool,
    ) -> ValidateContentResponse {
        let mut draft = draft.clone();
        if let Some(obj) = draft.as_object_mut() {
            obj.entry("kind")
                .or_insert_with(|| serde_json::Value::String(content_type.as_str().to_string()));
        }

        match self.validator.validate_one(&draft, document_id) {
            Ok((_, warnings)) if strict && !warnings.is_empty() => ValidateContentResponse {
                is_valid: false,
                issues: warnings
                    .into_iter()
                    .map(|w| ValidationIssue { path: w.path, message: w.message })
                    .collect(),
                warnings: vec![],
                enhanced_metadata: None,
            },
            Ok((item, warnings)) => ValidateContentResponse {
                is_valid: true,
                issues: vec![],
                warnings,
                enhanced_metadata: Some(enhanced_metadata_of(&item)),
            },
            Err(issues) => ValidateContentResponse {
                is_valid: false,
                issues,
                warnings: vec![],
                enhanced_metadata: None,
            },
        }
    }

    pub fn invalidate_cache(&self, key: &str) -> InvalidateCacheResponse {
        let outcomes = self.cache.invalidate_all(key);
        let invalidated = outcomes
            .values()
            .filter(|o| matches!(o, TierOutcome::Invalidated))
            .count();
        let targets = outcomes.keys().map(|t| t.as_str().to_string()).collect();
        InvalidateCacheResponse {
            invalidated,
            targets,
            timestamp: Utc::now(),
        }
    }

    pub fn get_cache_stats(&self, stats: CacheStats) -> CacheStatsResponse {
        let mut targets = BTreeMap::new();
        for tier in distro_cache::Tier::all() {
            targets.insert(tier.as_str().to_string(), "enabled".to_string());
        }
        CacheStatsResponse { stats, cache_targets: targets }
    }

    /// Liveness: the store and scheduler are reachable. Does not check
    /// circuit states (that's `ready`).
    pub fn health(&self) -> HealthState {
        match self.store.len() {
            Ok(_) => HealthState::Ok,
            Err(e) => HealthState::Degraded(vec![format!("store unreachable: {e}")]),
        }
    }

    /// Readiness: like `health`, plus a check that no channel's circuit is
    /// stuck open. Callers pass in the current circuit states since this
    /// crate doesn't hold publisher instances itself.
    pub fn ready(&self, circuit_states: &BTreeMap<Channel, distro_types::CircuitState>) -> HealthState {
        let mut problems = Vec::new();
        if let HealthState::Degraded(issues) = self.health() {
            problems.extend(issues);
        }
        for (channel, state) in circuit_states {
            if matches!(state, distro_types::CircuitState::Open) {
                problems.push(format!("{channel}: circuit open"));
            }
        }
        if problems.is_empty() {
            HealthState::Ok
        } else {
            HealthState::Degraded(problems)
        }
    }

    /// Counters and histograms. Kept as a plain map rather than a metrics
    /// framework type so this crate stays transport/observability-agnostic;
    /// a Prometheus or OTel exporter adapts this at the boundary.
    pub fn metrics(&self) -> Result<BTreeMap<String, f64>, ApiError> {
        let mut metrics = BTreeMap::new();
        let total = self.store.len().map_err(|e| ApiError::Unavailable(e.to_string()))?;
        metrics.insert("jobs_total".to_string(), total as f64);
        Ok(metrics)
    }
}

/// Fields derived during validation that a caller of `ValidateContent`
/// couldn't have known up front: resolved tone, computed reading time, word
/// count. Starts from the item's own metadata so channel-specific fields set
/// upstream survive the round trip.
fn enhanced_metadata_of(item: &distro_types::ContentItem) -> BTreeMap<String, String> {
    let mut metadata = item.metadata.clone();
    metadata.insert("word_count".to_string(), item.body.split_whitespace().count().to_string());
    if let Some(minutes) = item.reading_time_minutes {
        metadata.insert("reading_time_minutes".to_string(), minutes.to_string());
    }
    if let Some(tone) = &item.tone {
        metadata.insert("tone".to_string(), format!("{tone:?}"));
    }
    metadata
}

fn content_hash_of(raw: &RawContent) -> String {
    compute_fingerprint(
        &raw.document_id,
        &[],
        &serde_json::to_string(&raw.items).unwrap_or_default(),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::source::MemorySource;
    use distro_store::MemStore;
    use serde_json::json;
    use std::time::Duration;

    fn surface() -> JobSurface {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store)));
        let cache = Arc::new(CacheCoordinator::new(Duration::from_secs(5)));
        let source = Arc::new(MemorySource::new());
        source.put("D1", vec![json!({"kind": "update", "title": "T", "body": "b"})]);
        JobSurface::new(store, scheduler, cache, source, vec![Channel::Email, Channel::Web])
    }

    #[test]
    fn submit_then_get_round_trips() {
        let surface = surface();
        let response = surface
            .submit_sync_job(SubmitSyncJobRequest {
                document_id: "D1".into(),
                channels: vec![Channel::Email],
                content_type: ContentKind::Update,
                template: None,
                scheduled_for: None,
                dry_run: false,
                metadata: BTreeMap::new(),
            })
            .unwrap();
        let job = surface.get_sync_job(&response.job_id).unwrap();
        assert_eq!(job.job_id, response.job_id);
    }

    #[test]
    fn submit_requires_nonempty_channels() {
        let surface = surface();
        let err = surface
            .submit_sync_job(SubmitSyncJobRequest {
                document_id: "D1".into(),
                channels: vec![],
                content_type: ContentKind::Update,
                template: None,
                scheduled_for: None,
                dry_run: false,
                metadata: BTreeMap::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[test]
    fn duplicate_submission_returns_same_job_id() {
        let surface = surface();
        let request = || SubmitSyncJobRequest {
            document_id: "D1".into(),
            channels: vec![Channel::Email],
            content_type: ContentKind::Update,
            template: None,
            scheduled_for: None,
            dry_run: false,
            metadata: BTreeMap::new(),
        };
        let first = surface.submit_sync_job(request()).unwrap();
        let second = surface.submit_sync_job(request()).unwrap();
        assert_eq!(first.job_id, second.job_id);
    }

    #[test]
    fn validate_content_uses_is_valid_field_name() {
        let surface = surface();
        let response = surface.validate_content(
            &json!({"kind": "update", "title": "T", "body": "b"}),
            "D1",
            ContentKind::Update,
            false,
        );
        assert!(response.is_valid);
        assert!(response.enhanced_metadata.is_some());
    }

    #[test]
    fn strict_mode_promotes_warnings_to_issues() {
        let surface = surface();
        let draft = json!({
            "kind": "update", "title": "T", "body": "b",
            "scheduled_for": "2000-01-01T00:00:00Z",
        });

        let lenient = surface.validate_content(&draft, "D1", ContentKind::Update, false);
        assert!(lenient.is_valid);
        assert!(!lenient.warnings.is_empty());

        let strict = surface.validate_content(&draft, "D1", ContentKind::Update, true);
        assert!(!strict.is_valid);
        assert!(strict.issues.iter().any(|i| i.message.contains("scheduled_for")));
    }

    #[test]
    fn missing_kind_is_filled_in_from_content_type() {
        let surface = surface();
        let draft = json!({"title": "T", "body": "b"});
        let response = surface.validate_content(&draft, "D1", ContentKind::Blog, false);
        assert!(response.is_valid);
    }

    #[test]
    fn cancel_pending_job_succeeds() {
        let surface = surface();
        let response = surface
            .submit_sync_job(SubmitSyncJobRequest {
                document_id: "D1".into(),
                channels: vec![Channel::Email],
                content_type: ContentKind::Update,
                template: None,
                scheduled_for: None,
                dry_run: false,
                metadata: BTreeMap::new(),
            })
            .unwrap();
        assert!(surface.cancel_sync_job(&response.job_id).unwrap());
    }

    #[test]
    fn health_is_ok_for_a_reachable_store() {
        let surface = surface();
        assert_eq!(surface.health(), HealthState::Ok);
    }
}
