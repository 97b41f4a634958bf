//! End-to-end scenarios exercising submit → schedule → validate → render →
//! publish together, one test per documented behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use distro::api::{JobSurface, SubmitSyncJobRequest};
use distro::pipeline::Pipeline;
use distro::publisher::{BackendReceipt, ChannelBackend, EmailPublisher, TwitterPublisher, WebPublisher};
use distro::render::TemplateRenderer;
use distro::reporter::NullReporter;
use distro::resilient::ResilientPublisher;
use distro::scheduler::Scheduler;
use distro::source::MemorySource;
use distro_cache::CacheCoordinator;
use distro_circuit::CircuitConfig;
use distro_config::DistroConfig;
use distro_events::{EventBus, OverflowPolicy};
use distro_retry::{RetryPolicy, RetryStrategyConfig};
use distro_store::{JobStore, MemStore};
use distro_types::{
    Channel, ChannelError, ChannelStatus, ContentArtifact, ContentKind, ErrorKind, JobStatus, Publisher,
    Renderer,
};
use serde_json::json;

fn fast_retry() -> RetryStrategyConfig {
    let mut config = RetryPolicy::Default.to_config();
    config.base_delay = Duration::from_millis(1);
    config.max_delay = Duration::from_millis(2);
    config
}

struct AlwaysOk {
    calls: Arc<AtomicUsize>,
}

impl ChannelBackend for AlwaysOk {
    fn send(&self, artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BackendReceipt {
            sent: Some(1),
            content_id: Some(artifact.content_id.clone()),
            url: Some(format!("/updates/{}", artifact.content_id)),
        })
    }
}

struct AlwaysServerError {
    calls: Arc<AtomicUsize>,
}

impl ChannelBackend for AlwaysServerError {
    fn send(&self, _artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ChannelError::new(ErrorKind::Backend5xx, "server error"))
    }
}

/// Harness: a store, a scheduler, a `JobSurface` for submission, and a
/// `Pipeline` wired to whatever publishers the test registers.
struct Harness {
    surface: JobSurface,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<Scheduler>,
    events: Arc<EventBus>,
}

fn harness(publishers: BTreeMap<Channel, Arc<dyn Publisher>>, document_items: Vec<serde_json::Value>) -> Harness {
    let store: Arc<dyn JobStore> = Arc::new(MemStore::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&store)));
    let cache = Arc::new(CacheCoordinator::new(Duration::from_secs(5)));
    let source = Arc::new(MemorySource::new());
    source.put("D1", document_items);
    let registered: Vec<Channel> = publishers.keys().copied().collect();
    let surface = JobSurface::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        cache,
        source.clone(),
        registered,
    );
    let events = Arc::new(EventBus::new());
    let config = DistroConfig::new();
    let pipeline = Arc::new(Pipeline::new(
        store,
        Arc::clone(&scheduler),
        source,
        Arc::new(TemplateRenderer::new()),
        publishers,
        Arc::clone(&events),
        &config,
    ));
    Harness { surface, pipeline, scheduler, events }
}

fn submit(surface: &JobSurface, channels: Vec<Channel>, dry_run: bool) -> String {
    surface
        .submit_sync_job(SubmitSyncJobRequest {
            document_id: "D1".into(),
            channels,
            content_type: ContentKind::Update,
            template: None,
            scheduled_for: None,
            dry_run,
            metadata: BTreeMap::new(),
        })
        .unwrap()
        .job_id
}

#[test]
fn s1_happy_path_email_and_web() {
    let email_calls = Arc::new(AtomicUsize::new(0));
    let web_calls = Arc::new(AtomicUsize::new(0));
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(
        Channel::Email,
        Arc::new(EmailPublisher::new(Box::new(AlwaysOk { calls: email_calls.clone() }), 3600, 10)),
    );
    publishers.insert(
        Channel::Web,
        Arc::new(WebPublisher::new(Box::new(AlwaysOk { calls: web_calls.clone() }), 3600, 10)),
    );
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": "shipped things", "published": true})],
    );

    submit(&harness.surface, vec![Channel::Email, Channel::Web], false);
    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);

    assert_eq!(driven.len(), 1);
    let job = &driven[0];
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results[&Channel::Email].status, ChannelStatus::Success);
    assert_eq!(job.results[&Channel::Web].status, ChannelStatus::Success);
    assert!(job.results[&Channel::Web].url.as_deref().unwrap().starts_with("/updates/"));
}

#[test]
fn s2_partial_failure_when_web_backend_errors() {
    let email_calls = Arc::new(AtomicUsize::new(0));
    let web_calls = Arc::new(AtomicUsize::new(0));
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(
        Channel::Email,
        Arc::new(EmailPublisher::new(Box::new(AlwaysOk { calls: email_calls.clone() }), 3600, 10)),
    );
    let web = WebPublisher::new(Box::new(AlwaysServerError { calls: web_calls.clone() }), 3600, 10);
    publishers.insert(
        Channel::Web,
        Arc::new(ResilientPublisher::new(web, fast_retry(), CircuitConfig::default())),
    );
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": "shipped things", "published": true})],
    );

    submit(&harness.surface, vec![Channel::Email, Channel::Web], false);
    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);

    let job = &driven[0];
    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!(job.results[&Channel::Email].status, ChannelStatus::Success);
    let web_result = &job.results[&Channel::Web];
    assert_eq!(web_result.status, ChannelStatus::Failed);
    assert_eq!(web_result.attempts, 3);
    assert_eq!(web_result.error.as_ref().unwrap().kind, ErrorKind::Backend5xx);
    assert_eq!(web_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn s3_circuit_open_short_circuits_with_no_outbound_call() {
    let web_calls = Arc::new(AtomicUsize::new(0));
    let web = WebPublisher::new(Box::new(AlwaysServerError { calls: web_calls.clone() }), 3600, 10);
    let mut single_shot_retry = fast_retry();
    single_shot_retry.max_attempts = 1;
    let web_resilient = Arc::new(ResilientPublisher::new(web, single_shot_retry, CircuitConfig::default()));

    let artifact = ContentArtifact {
        channel: Channel::Web,
        content_id: "warmup".into(),
        subject: None,
        body: "warmup body".into(),
        hashtags: vec![],
        link: None,
        media: vec![],
    };
    for _ in 0..5 {
        let result = web_resilient.publish(&artifact, false);
        assert_eq!(result.status, ChannelStatus::Failed);
    }
    assert_eq!(web_calls.load(Ordering::SeqCst), 5);

    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(Channel::Web, web_resilient);
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": "shipped things", "published": true})],
    );

    submit(&harness.surface, vec![Channel::Web], false);
    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);

    let job = &driven[0];
    let web_result = &job.results[&Channel::Web];
    assert_eq!(web_result.status, ChannelStatus::Failed);
    assert_eq!(web_result.error.as_ref().unwrap().kind, ErrorKind::CircuitOpen);
    assert_eq!(web_calls.load(Ordering::SeqCst), 5, "no outbound call during the short-circuited publish");
}

#[test]
fn s4_dry_run_touches_no_backend_and_respects_twitter_limit() {
    let email_calls = Arc::new(AtomicUsize::new(0));
    let twitter_calls = Arc::new(AtomicUsize::new(0));
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(
        Channel::Email,
        Arc::new(EmailPublisher::new(Box::new(AlwaysOk { calls: email_calls.clone() }), 3600, 10)),
    );
    publishers.insert(
        Channel::SocialTwitter,
        Arc::new(TwitterPublisher::new(Box::new(AlwaysOk { calls: twitter_calls.clone() }), 3600, 10)),
    );
    let long_body = "x ".repeat(200);
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": long_body, "published": true})],
    );

    submit(&harness.surface, vec![Channel::Email, Channel::SocialTwitter], true);
    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);

    let job = &driven[0];
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results[&Channel::Email].status, ChannelStatus::DryRun);
    assert_eq!(job.results[&Channel::SocialTwitter].status, ChannelStatus::DryRun);
    assert_eq!(email_calls.load(Ordering::SeqCst), 0);
    assert_eq!(twitter_calls.load(Ordering::SeqCst), 0);

    let validator = distro::validator::Validator::new(vec![Channel::Email, Channel::SocialTwitter]);
    let (item, _) = validator
        .validate_one(&json!({"kind": "update", "title": "Weekly Progress", "body": long_body}), "D1")
        .unwrap();
    let artifact = TemplateRenderer::new().render(&item, Channel::SocialTwitter, None).unwrap();
    assert!(TwitterPublisher::compose(&artifact).chars().count() <= 280);
}

#[test]
fn s5_duplicate_submission_deduplicates_and_produces_one_event_pair() {
    let email_calls = Arc::new(AtomicUsize::new(0));
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(
        Channel::Email,
        Arc::new(EmailPublisher::new(Box::new(AlwaysOk { calls: email_calls.clone() }), 3600, 10)),
    );
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": "shipped things", "published": true})],
    );
    let subscription = harness.events.subscribe(OverflowPolicy::DropNewest);

    let first_id = submit(&harness.surface, vec![Channel::Email], false);
    let second_id = submit(&harness.surface, vec![Channel::Email], false);
    assert_eq!(first_id, second_id);

    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);
    assert_eq!(driven.len(), 1, "only one orchestrator run for the deduplicated job");

    let mut channel_events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        if event.channel == Some(Channel::Email) {
            channel_events.push(event);
        }
    }
    assert_eq!(channel_events.len(), 2, "exactly one started/finished pair");
}

#[test]
fn s6_scheduled_release_fires_close_to_scheduled_for() {
    let email_calls = Arc::new(AtomicUsize::new(0));
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    publishers.insert(
        Channel::Email,
        Arc::new(EmailPublisher::new(Box::new(AlwaysOk { calls: email_calls.clone() }), 3600, 10)),
    );
    let harness = harness(
        publishers,
        vec![json!({"kind": "update", "title": "Weekly Progress", "body": "shipped things", "published": true})],
    );

    let scheduled_for = Utc::now() + chrono::Duration::milliseconds(150);
    harness
        .surface
        .submit_sync_job(SubmitSyncJobRequest {
            document_id: "D1".into(),
            channels: vec![Channel::Email],
            content_type: ContentKind::Update,
            template: None,
            scheduled_for: Some(scheduled_for),
            dry_run: false,
            metadata: BTreeMap::new(),
        })
        .unwrap();

    assert!(harness.scheduler.release_due().is_empty(), "not due yet");

    std::thread::sleep(Duration::from_millis(200));
    let mut reporter = NullReporter;
    let driven = harness.pipeline.drive_pending(&mut reporter);
    assert_eq!(driven.len(), 1);

    let started_at = driven[0].started_at.expect("orchestrator sets started_at");
    let delta = (started_at - scheduled_for).num_milliseconds().abs();
    assert!(delta <= 250, "started_at drifted {delta}ms from scheduled_for");
}
