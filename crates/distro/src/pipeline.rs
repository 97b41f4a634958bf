//! Wires a `DistroConfig` to the rest of the crate and drives released jobs
//! end to end: validate the fetched document, render an artifact per
//! channel, and run the orchestrator against the registered publishers
//! (§5, §6.4).
//!
//! `Pipeline::drive_pending` is the one method a CLI subcommand or a
//! background loop calls on a timer; nothing in this crate owns that timer
//! itself.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;

use chrono::Utc;
use distro_config::DistroConfig;
use distro_events::EventBus;
use distro_store::{JobStore, StoreError};
use distro_types::{Channel, ContentSource, JobStatus, Publisher, Renderer, SyncJob};

use crate::dryrun::DryRunGuard;
use crate::orchestrator::{ChannelWork, SyncOrchestrator};
use crate::reporter::{RecordingReporter, Reporter};
use crate::scheduler::Scheduler;
use crate::validator::Validator;
use crate::workerpool::WorkerPool;

/// Everything the pipeline needs to drive a job: where jobs live, who
/// schedules them, where content comes from, how it's rendered, and who
/// publishes each channel. Construct once per process, wrap in an `Arc`,
/// and call [`Pipeline::drive_pending`] from a CLI subcommand or a
/// background loop on a timer.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    content_source: Arc<dyn ContentSource>,
    validator: Validator,
    renderer: Arc<dyn Renderer>,
    publishers: BTreeMap<Channel, Arc<dyn Publisher>>,
    orchestrator: SyncOrchestrator,
    dry_run_guard: DryRunGuard,
    job_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<Scheduler>,
        content_source: Arc<dyn ContentSource>,
        renderer: Arc<dyn Renderer>,
        publishers: BTreeMap<Channel, Arc<dyn Publisher>>,
        events: Arc<EventBus>,
        config: &DistroConfig,
    ) -> Self {
        for &channel in publishers.keys() {
            scheduler.configure_channel_rate(channel, config.rate_limit_for(channel), 1);
        }
        // Channels within a single job fan out on their own threads, bounded
        // only by how many channels exist at all (§4.4) — the job-level pool
        // below is what bounds overall concurrency (§5).
        let orchestrator = SyncOrchestrator::new(events, Channel::all().len())
            .with_job_deadline(config.default_deadline());
        Self {
            store,
            scheduler,
            content_source,
            validator: Validator::new(publishers.keys().copied().collect()),
            renderer,
            publishers,
            orchestrator,
            dry_run_guard: DryRunGuard::new(config.dry_run.global),
            job_concurrency: config.max_concurrent_jobs(),
        }
    }

    /// Releases every due job (§4.5) and drives each to completion across a
    /// bounded pool of worker threads (§5, default concurrency 8) before
    /// returning. Safe to call on a loop: a tick with nothing due is a
    /// cheap no-op.
    ///
    /// Requires `Arc<Pipeline>` because each released job runs on its own
    /// worker thread; per-thread progress lines are collected and replayed
    /// into `reporter` in job order once every job finishes.
    pub fn drive_pending(self: &Arc<Self>, reporter: &mut dyn Reporter) -> Vec<SyncJob> {
        let due = self.scheduler.release_due();
        if due.is_empty() {
            return Vec::new();
        }

        let pool = WorkerPool::new(self.job_concurrency);
        let (tx, rx) = mpsc::channel::<(SyncJob, Vec<String>)>();
        let dispatched = due.len();

        for mut job in due {
            let pipeline = Arc::clone(self);
            let tx = tx.clone();
            pool.execute(move || {
                let mut local_reporter = RecordingReporter::default();
                pipeline.drive_one(&mut job, &mut local_reporter);
                let _ = tx.send((job, local_reporter.lines));
            });
        }
        drop(tx);

        rx.iter()
            .take(dispatched)
            .map(|(job, lines)| {
                for line in lines {
                    reporter.info(&line);
                }
                job
            })
            .collect()
    }

    fn drive_one(&self, job: &mut SyncJob, reporter: &mut dyn Reporter) {
        let raw = match self.content_source.fetch(&job.document_id) {
            Ok(raw) => raw,
            Err(e) => {
                self.fail_job(job, &format!("fetch failed: {e}"));
                reporter.error(&format!("job {}: fetch failed: {e}", job.job_id));
                return;
            }
        };

        let outcome = self.validator.validate(&raw);
        if outcome.items.is_empty() {
            self.fail_job(job, "no valid content items survived validation");
            reporter.warn(&format!("job {}: nothing to publish", job.job_id));
            return;
        }

        let mut work = BTreeMap::new();
        for &channel in &job.channels {
            let Some(publisher) = self.publishers.get(&channel) else {
                reporter.warn(&format!("no publisher registered for {channel}"));
                continue;
            };
            let item = outcome
                .items
                .iter()
                .find(|item| item.channels.is_empty() || item.channels.contains(&channel));
            let Some(item) = item else { continue };
            let template = job.template.as_deref().or(item.template.as_deref());
            match self.renderer.render(item, channel, template) {
                Ok(artifact) => {
                    work.insert(channel, ChannelWork { publisher: Arc::clone(publisher), artifact });
                }
                Err(e) => reporter.error(&format!("render failed for {channel}: {e}")),
            }
        }

        self.orchestrator
            .run(job, work, self.dry_run_guard, &|| false, reporter);

        self.persist(job);
        self.scheduler.finish(job);
    }

    fn fail_job(&self, job: &mut SyncJob, reason: &str) {
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.errors.push(reason.to_string());
        self.persist(job);
        self.scheduler.finish(job);
    }

    fn persist(&self, job: &SyncJob) {
        let snapshot = job.clone();
        let result = self.store.transition(
            &job.job_id,
            JobStatus::InProgress,
            Box::new(move |stored| *stored = snapshot),
        );
        if let Err(StoreError::StateMismatch { .. } | StoreError::NotFound(_)) = result {
            // Job was cancelled or evicted out from under us between release
            // and completion; nothing left to write back.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{BackendReceipt, ChannelBackend, EmailPublisher};
    use crate::render::TemplateRenderer;
    use crate::source::MemorySource;
    use distro_store::MemStore;
    use distro_types::ChannelError;
    use serde_json::json;
    use std::time::Duration;

    struct AlwaysOk;
    impl ChannelBackend for AlwaysOk {
        fn send(&self, artifact: &distro_types::ContentArtifact) -> Result<BackendReceipt, ChannelError> {
            Ok(BackendReceipt {
                sent: Some(1),
                content_id: Some(artifact.content_id.clone()),
                url: Some(format!("/updates/{}", artifact.content_id)),
            })
        }
    }

    fn pipeline(store: Arc<dyn JobStore>) -> Pipeline {
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store)));
        let source = Arc::new(MemorySource::new());
        source.put("D1", vec![json!({"kind": "update", "title": "T", "body": "hello world"})]);
        let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
        publishers.insert(Channel::Email, Arc::new(EmailPublisher::new(Box::new(AlwaysOk), 3600, 10)));
        let events = Arc::new(EventBus::new());
        let config = DistroConfig::new();
        Pipeline::new(
            store,
            scheduler,
            source,
            Arc::new(TemplateRenderer::new()),
            publishers,
            events,
            &config,
        )
    }

    fn job() -> SyncJob {
        SyncJob {
            job_id: "job-1".into(),
            correlation_id: "corr-1".into(),
            document_id: "D1".into(),
            channels: vec![Channel::Email],
            status: JobStatus::InProgress,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            results: BTreeMap::new(),
            errors: vec![],
            metadata: BTreeMap::new(),
            dry_run: false,
            content_hash: "hash-1".into(),
            content_type: distro_types::ContentKind::Update,
            template: None,
        }
    }

    #[test]
    fn drive_one_publishes_and_persists_completion() {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        store.insert(job()).unwrap();
        let pipeline = pipeline(Arc::clone(&store));
        let mut reporter = crate::reporter::NullReporter;
        let mut job = job();
        pipeline.drive_one(&mut job, &mut reporter);
        assert_eq!(job.status, JobStatus::Completed);
        let stored = store.get("job-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[test]
    fn drive_pending_releases_and_runs_scheduled_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        let pipeline = Arc::new(pipeline(Arc::clone(&store)));
        let (submitted, _) = pipeline.scheduler.submit(job()).unwrap();
        let _ = submitted;
        let mut reporter = crate::reporter::NullReporter;
        let driven = pipeline.drive_pending(&mut reporter);
        assert_eq!(driven.len(), 1);
        assert_eq!(driven[0].status, JobStatus::Completed);
    }

    #[test]
    fn drive_pending_runs_multiple_due_jobs_concurrently() {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        let pipeline = Arc::new(pipeline(Arc::clone(&store)));
        for n in 0..5 {
            let mut extra = job();
            extra.job_id = format!("job-{n}");
            extra.content_hash = format!("hash-{n}");
            pipeline.scheduler.submit(extra).unwrap();
        }
        let mut reporter = crate::reporter::NullReporter;
        let driven = pipeline.drive_pending(&mut reporter);
        assert_eq!(driven.len(), 5);
        assert!(driven.iter().all(|j| j.status == JobStatus::Completed));
    }

    #[test]
    fn missing_content_fails_the_job() {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        let mut unknown_doc_job = job();
        unknown_doc_job.document_id = "missing-doc".into();
        store.insert(unknown_doc_job.clone()).unwrap();
        let pipeline = pipeline(Arc::clone(&store));
        let mut reporter = crate::reporter::NullReporter;
        pipeline.drive_one(&mut unknown_doc_job, &mut reporter);
        assert_eq!(unknown_doc_job.status, JobStatus::Failed);
    }

    #[test]
    fn pipeline_configures_rate_buckets_for_registered_channels() {
        let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
        let pipeline = pipeline(store);
        assert!(pipeline.scheduler.rate_bucket(Channel::Email).is_some());
        let _ = Duration::from_secs(0);
    }
}
