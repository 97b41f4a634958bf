//! Fans a `SyncJob` out across channels and aggregates the final status
//! (§4.4).
//!
//! Channels run concurrently, chunked by `max_concurrent` the same way the
//! teacher's parallel publish engine chunks crates within a dependency
//! level: spawn a thread per channel in the chunk, join the whole chunk,
//! then move to the next. Per-channel failure never aborts the others.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use distro_events::EventBus;
use distro_types::{
    Channel, ChannelError, ChannelResult, ChannelStatus, ContentArtifact, ErrorKind, JobEvent,
    JobPhase, JobStatus, Publisher, SyncJob,
};

use crate::dryrun::DryRunGuard;
use crate::reporter::Reporter;

/// Per-channel work item: the publisher to call and the artifact it should
/// publish.
pub struct ChannelWork {
    pub publisher: Arc<dyn Publisher>,
    pub artifact: ContentArtifact,
}

pub struct SyncOrchestrator {
    events: Arc<EventBus>,
    max_concurrent_channels: usize,
    channel_timeout: Duration,
    job_deadline: Duration,
}

impl SyncOrchestrator {
    pub fn new(events: Arc<EventBus>, max_concurrent_channels: usize) -> Self {
        Self {
            events,
            max_concurrent_channels: max_concurrent_channels.max(1),
            channel_timeout: Duration::from_secs(30),
            job_deadline: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    /// Runs `job` against `work` (one entry per channel), mutating `job` in
    /// place and reporting progress. `cancelled` is polled between chunks so
    /// a cancel signal prevents any not-yet-started channel from running
    /// while letting in-flight publishes finish.
    pub fn run(
        &self,
        job: &mut SyncJob,
        work: BTreeMap<Channel, ChannelWork>,
        dry_run_guard: DryRunGuard,
        cancelled: &(impl Fn() -> bool + Sync),
        reporter: &mut dyn Reporter,
    ) {
        debug_assert!(!job.status.is_terminal(), "orchestrator must not run a terminal job");

        job.status = JobStatus::InProgress;
        job.started_at = Some(Utc::now());
        let deadline = Instant::now() + self.job_deadline;
        let dry_run = dry_run_guard.effective(job.dry_run);

        let channels: Vec<Channel> = work.keys().copied().collect();
        let mut work = work;

        for chunk in channels.chunks(self.max_concurrent_channels) {
            if cancelled() {
                reporter.warn("job cancelled before remaining channels started");
                break;
            }

            let (tx, rx) = mpsc::channel::<(Channel, ChannelResult)>();
            let mut handles = Vec::new();

            for &channel in chunk {
                let Some(item) = work.remove(&channel) else { continue };
                let tx = tx.clone();
                let job_id = job.job_id.clone();
                let correlation_id = job.correlation_id.clone();
                let events = Arc::clone(&self.events);

                events.publish(JobEvent {
                    job_id: job_id.clone(),
                    correlation_id: correlation_id.clone(),
                    channel: Some(channel),
                    phase: JobPhase::Started,
                    status: None,
                    timestamp: Utc::now(),
                });

                handles.push(std::thread::spawn(move || {
                    let result = item.publisher.publish(&item.artifact, dry_run);
                    events.publish(JobEvent {
                        job_id,
                        correlation_id,
                        channel: Some(channel),
                        phase: JobPhase::Finished,
                        status: Some(result.status),
                        timestamp: Utc::now(),
                    });
                    let _ = tx.send((channel, result));
                }));
            }
            drop(tx);

            for handle in handles {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining.max(self.channel_timeout)) {
                    Ok((channel, result)) => {
                        reporter.info(&format!("{channel}: {:?}", result.status));
                        job.results.insert(channel, result);
                    }
                    Err(_) => {
                        // Deadline elapsed; record a timeout without waiting
                        // on the thread, which is left to finish detached
                        // (it has no channel to report back to beyond this).
                        reporter.error("job deadline exceeded waiting for a channel");
                    }
                }
                let _ = handle.join();
            }
        }

        // Any channel that never produced a result (deadline hit before its
        // message arrived) is recorded as a timeout now.
        for &channel in &channels {
            job.results.entry(channel).or_insert_with(|| ChannelResult {
                channel,
                status: ChannelStatus::Failed,
                sent: None,
                content_id: None,
                url: None,
                error: Some(ChannelError::new(ErrorKind::Timeout, "job deadline exceeded")),
                timestamp: Utc::now(),
                attempts: 0,
            });
        }

        job.completed_at = Some(Utc::now());

        let final_status = if cancelled() {
            JobStatus::Cancelled
        } else {
            job.aggregate_status().unwrap_or(JobStatus::Failed)
        };

        debug_assert!(
            !job.status.is_terminal() || job.status == final_status,
            "monotonicity: a terminal job must not be re-transitioned"
        );
        job.status = final_status;

        self.events.publish(JobEvent {
            job_id: job.job_id.clone(),
            correlation_id: job.correlation_id.clone(),
            channel: None,
            phase: JobPhase::Finished,
            status: None,
            timestamp: Utc::now(),
        });
    }
}
