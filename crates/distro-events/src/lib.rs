//! Event logging and live subscription for job lifecycle events.
//!
//! This crate has two halves:
//!
//! - [`EventLog`]: an append-only JSONL log of [`JobEvent`](distro_types::JobEvent)
//!   values, one per job, written alongside the job's receipt for later
//!   inspection (§4.4, §5).
//! - [`EventBus`]: an in-process fan-out of the same events to live
//!   subscribers (a WebSocket handler, a metrics sink), each with its own
//!   bounded queue so a slow subscriber can't stall publishing.
//!
//! # Example
//!
//! ```
//! use distro_events::EventLog;
//! use distro_types::{JobEvent, JobPhase};
//! use chrono::Utc;
//!
//! let mut log = EventLog::new();
//!
//! let event = JobEvent {
//!     job_id: "job-1".to_string(),
//!     correlation_id: "corr-1".to_string(),
//!     channel: None,
//!     phase: JobPhase::Started,
//!     status: None,
//!     timestamp: Utc::now(),
//! };
//!
//! log.record(event);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use anyhow::{Context, Result};
use distro_types::JobEvent;

/// Default events file name, placed alongside a job's receipt.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Capacity of a single subscriber's queue before it is considered slow.
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Get the events file path for a job's state directory.
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// Append-only event log for a job's lifecycle.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<JobEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: JobEvent) {
        self.events.push(event);
    }

    /// Write all recorded events to a file in JSONL format, appending if the
    /// file already exists.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{}", line).context("failed to write event line")?;
        }

        writer.flush().context("failed to flush events file")?;

        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            let event: JobEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {}", line))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    pub fn events_for_job(&self, job_id: &str) -> Vec<&JobEvent> {
        self.events.iter().filter(|e| e.job_id == job_id).collect()
    }

    pub fn all_events(&self) -> &[JobEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// How a subscriber wants to handle backpressure when its queue fills up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the event that doesn't fit and keep the subscriber connected.
    /// Appropriate for metrics sinks, where the latest state matters more
    /// than every intermediate one.
    DropNewest,
    /// Disconnect the subscriber entirely. Appropriate for consumers (a
    /// WebSocket client) that need an ordered, complete stream and would
    /// rather reconnect than silently miss events.
    Disconnect,
}

/// A live handle to a subscriber's event queue.
pub struct Subscription {
    receiver: Receiver<JobEvent>,
}

impl Subscription {
    pub fn recv(&self) -> Option<JobEvent> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<JobEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = JobEvent> + '_ {
        self.receiver.iter()
    }
}

struct Subscriber {
    sender: SyncSender<JobEvent>,
    policy: OverflowPolicy,
    disconnected: bool,
}

/// In-process publish/subscribe fan-out for job events. Each subscriber gets
/// its own bounded channel so one slow consumer never blocks delivery to the
/// others or to the publishing thread.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe with the given overflow policy. Returns a handle to read
    /// events as they're published.
    pub fn subscribe(&self, policy: OverflowPolicy) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_CAPACITY);
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.push(Subscriber {
            sender: tx,
            policy,
            disconnected: false,
        });
        Subscription { receiver: rx }
    }

    /// Publish an event to every live subscriber. Subscribers whose queue is
    /// full are handled per their `OverflowPolicy`; disconnected subscribers
    /// are pruned from the bus.
    pub fn publish(&self, event: JobEvent) {
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        for sub in subs.iter_mut() {
            if sub.disconnected {
                continue;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match sub.policy {
                    OverflowPolicy::DropNewest => {}
                    OverflowPolicy::Disconnect => sub.disconnected = true,
                },
                Err(TrySendError::Disconnected(_)) => sub.disconnected = true,
            }
        }
        subs.retain(|s| !s.disconnected);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("event bus mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use distro_types::{Channel, ChannelStatus, JobPhase};

    fn sample_event(job_id: &str) -> JobEvent {
        JobEvent {
            job_id: job_id.to_string(),
            correlation_id: format!("corr-{job_id}"),
            channel: Some(Channel::Email),
            phase: JobPhase::Progress,
            status: Some(ChannelStatus::Success),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_event_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn record_adds_event_to_log() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn events_for_job_filters_correctly() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1"));
        log.record(sample_event("job-2"));
        log.record(sample_event("job-1"));

        assert_eq!(log.events_for_job("job-1").len(), 2);
        assert_eq!(log.events_for_job("job-2").len(), 1);
    }

    #[test]
    fn write_to_file_creates_jsonl_format() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("events.jsonl");

        let mut log = EventLog::new();
        log.record(sample_event("job-1"));
        log.write_to_file(&path).expect("write");

        let content = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);

        let _: JobEvent = serde_json::from_str(lines[0]).expect("parse");
    }

    #[test]
    fn write_to_file_appends_to_existing_file() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("events.jsonl");

        let mut log1 = EventLog::new();
        log1.record(sample_event("job-1"));
        log1.write_to_file(&path).expect("write first");

        let mut log2 = EventLog::new();
        log2.record(sample_event("job-1"));
        log2.write_to_file(&path).expect("write second");

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn read_from_file_loads_all_events() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("events.jsonl");

        let mut log = EventLog::new();
        log.record(sample_event("job-1"));
        log.record(sample_event("job-1"));
        log.write_to_file(&path).expect("write");

        let loaded = EventLog::read_from_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn read_from_file_returns_empty_log_when_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("nonexistent.jsonl");

        let loaded = EventLog::read_from_file(&path).expect("read");
        assert!(loaded.is_empty());
    }

    #[test]
    fn path_helper_returns_expected_path() {
        let base = PathBuf::from("x");
        assert_eq!(events_path(&base), PathBuf::from("x").join(EVENTS_FILE));
    }

    #[test]
    fn clear_removes_all_events() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1"));
        log.record(sample_event("job-2"));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn bus_delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let sub_a = bus.subscribe(OverflowPolicy::Disconnect);
        let sub_b = bus.subscribe(OverflowPolicy::DropNewest);

        bus.publish(sample_event("job-1"));

        assert_eq!(sub_a.try_recv().map(|e| e.job_id), Some("job-1".to_string()));
        assert_eq!(sub_b.try_recv().map(|e| e.job_id), Some("job-1".to_string()));
    }

    #[test]
    fn drop_newest_keeps_subscriber_connected_when_full() {
        let bus = EventBus::new();
        let sub = bus.subscribe(OverflowPolicy::DropNewest);

        for _ in 0..SUBSCRIBER_CAPACITY + 10 {
            bus.publish(sample_event("job-1"));
        }

        assert_eq!(bus.subscriber_count(), 1);
        // Queue is full of earlier events; at least one is still readable.
        assert!(sub.try_recv().is_some());
    }

    #[test]
    fn disconnect_policy_drops_subscriber_when_full() {
        let bus = EventBus::new();
        let _sub = bus.subscribe(OverflowPolicy::Disconnect);

        for _ in 0..SUBSCRIBER_CAPACITY + 10 {
            bus.publish(sample_event("job-1"));
        }

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_receiver_prunes_subscriber_on_next_publish() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(OverflowPolicy::Disconnect);
            assert_eq!(bus.subscriber_count(), 1);
        }
        bus.publish(sample_event("job-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
