//! # Types
//!
//! Core domain types for the content distribution pipeline: content items,
//! sync jobs, channel results, and the error/duration plumbing shared by
//! every other crate in the workspace.
//!
//! - [`ContentItem`] — a validated, immutable unit of content
//! - [`SyncJob`] — a unit of cross-channel orchestration
//! - [`ChannelResult`] — the outcome of publishing to a single channel
//! - [`ErrorKind`] — the machine-readable error taxonomy
//!
//! ## Serialization
//!
//! Every type here is `Serialize`/`Deserialize`. Durations serialize as
//! milliseconds for cross-platform stability but accept either a
//! human-readable string (`"4s"`) or a raw integer on the way in.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Deserialize a Duration from either a string (human-readable) or u64 (milliseconds).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {}", e))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a Duration as milliseconds (u64) so it roundtrips with `deserialize_duration`.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A logical publishing destination. Closed variant set per the
/// Publisher-polymorphism redesign note: no reflective/duck-typed discovery,
/// registration is by explicit channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Web,
    SocialTwitter,
    SocialLinkedIn,
    SocialFacebook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Web => "web",
            Channel::SocialTwitter => "social_twitter",
            Channel::SocialLinkedIn => "social_linkedin",
            Channel::SocialFacebook => "social_facebook",
        }
    }

    pub fn all() -> &'static [Channel] {
        &[
            Channel::Email,
            Channel::Web,
            Channel::SocialTwitter,
            Channel::SocialLinkedIn,
            Channel::SocialFacebook,
        ]
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "web" => Ok(Channel::Web),
            "social_twitter" | "twitter" => Ok(Channel::SocialTwitter),
            "social_linkedin" | "linkedin" => Ok(Channel::SocialLinkedIn),
            "social_facebook" | "facebook" => Ok(Channel::SocialFacebook),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// The recognized content kinds. A tagged sum rather than a duck-typed base
/// class, per the living-document redesign note — the Validator is solely
/// responsible for the raw-to-typed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Update,
    Blog,
    Announcement,
    SessionSummary,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Update => "update",
            ContentKind::Blog => "blog",
            ContentKind::Announcement => "announcement",
            ContentKind::SessionSummary => "session_summary",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(ContentKind::Update),
            "blog" => Ok(ContentKind::Blog),
            "announcement" => Ok(ContentKind::Announcement),
            "session_summary" => Ok(ContentKind::SessionSummary),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

/// Tone applied by the personalizer. Professional/community is the default
/// for LinkedIn/Facebook per the channel contract in §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Neutral,
    Professional,
    Casual,
    Community,
    Urgent,
}

/// A validated, immutable unit of content produced by the Validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub kind: ContentKind,
    /// Stable identifier derived from source + content hash.
    pub id: String,
    pub title: String,
    pub body: String,
    pub published: bool,
    pub featured: bool,
    /// 1..5, 1 = highest.
    pub priority: u8,
    /// Empty set means "all eligible".
    pub channels: Vec<Channel>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub template: Option<String>,
    pub tone: Option<Tone>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Computed for `blog` items at 200 words/minute, minimum 1. `None` for
    /// other kinds.
    pub reading_time_minutes: Option<u32>,
}

impl ContentItem {
    /// `id` derivation: source id + a content hash over title+body+flags, so
    /// two items with the same id are required to have identical
    /// title+body+flags (the invariant the Validator enforces on input).
    pub fn derive_id(source_id: &str, title: &str, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(title.as_bytes());
        hasher.update(b"\0");
        hasher.update(body.as_bytes());
        let digest = hasher.finalize();
        format!("{}-{}", source_id, hex::encode(&digest[..8]))
    }

    /// Channels this item is eligible for, given the registered set.
    /// Empty `channels` means "all eligible".
    pub fn eligible_channels(&self, registered: &[Channel]) -> Vec<Channel> {
        if self.channels.is_empty() {
            registered.to_vec()
        } else {
            self.channels
                .iter()
                .copied()
                .filter(|c| registered.contains(c))
                .collect()
        }
    }
}

/// A rendered, channel-specific payload ready for publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub channel: Channel,
    pub content_id: String,
    pub subject: Option<String>,
    pub body: String,
    pub hashtags: Vec<String>,
    pub link: Option<String>,
    pub media: Vec<String>,
}

/// Error taxonomy from §7: kinds, not type names. Used both to classify
/// retry behavior and to tag `ChannelResult.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    TransportError,
    Backend5xx,
    RateLimited,
    Backend4xx,
    CircuitOpen,
    Timeout,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    /// Whether this error class is retried per the ResilientPublisher policy
    /// in §4.3: transport errors, 5xx, and 429/408/425 are retryable;
    /// everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportError | ErrorKind::Backend5xx | ErrorKind::RateLimited
        )
    }

    /// Whether this error class counts toward the circuit breaker's failure
    /// window. `circuit_open` fail-fasts are explicitly excluded.
    pub fn counts_toward_circuit(&self) -> bool {
        !matches!(self, ErrorKind::CircuitOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::Backend5xx => "backend_5xx",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Backend4xx => "backend_4xx",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A short machine tag plus human message, with correlation id carried
/// alongside per §7's user-visible behavior requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ChannelError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl ChannelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Per-channel result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Success,
    Failed,
    Skipped,
    DryRun,
}

/// Outcome of publishing (or previewing) a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub sent: Option<u64>,
    pub content_id: Option<String>,
    pub url: Option<String>,
    pub error: Option<ChannelError>,
    pub timestamp: DateTime<Utc>,
    /// `attempts >= 1` for any non-skipped result.
    pub attempts: u32,
}

impl ChannelResult {
    pub fn skipped(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            status: ChannelStatus::Skipped,
            sent: None,
            content_id: None,
            url: None,
            error: Some(ChannelError::new(ErrorKind::InternalError, reason)),
            timestamp: Utc::now(),
            attempts: 0,
        }
    }
}

/// Job lifecycle states (§4.7). Terminal states are immutable; `* ->
/// cancelled` is only accepted from non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A unit of cross-channel orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: String,
    /// Externally visible request identifier, propagated through logs and
    /// events.
    pub correlation_id: String,
    pub document_id: String,
    pub channels: Vec<Channel>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: BTreeMap<Channel, ChannelResult>,
    pub errors: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub dry_run: bool,
    /// Content hash used for single-flight deduplication (§4.5).
    pub content_hash: String,
    pub content_type: ContentKind,
    /// Per-job template override (§6.1); takes precedence over any
    /// per-item template resolved during validation/rendering.
    pub template: Option<String>,
}

impl SyncJob {
    /// `fingerprint(job) = hash(document_id || normalized(channels) ||
    /// content_hash || scheduled_bucket)` (§3). `scheduled_bucket` rounds
    /// `scheduled_for` (or "now") down to the minute so near-simultaneous
    /// submissions with a few milliseconds of clock skew still collapse.
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(
            &self.document_id,
            &self.channels,
            &self.content_hash,
            self.scheduled_for,
        )
    }

    /// Whether the aggregated per-channel results imply `completed` (all
    /// success/dry_run), `partial` (mixed), or `failed` (all failed), per
    /// §4.4's final status rules. Returns `None` if no channel has finished
    /// yet.
    pub fn aggregate_status(&self) -> Option<JobStatus> {
        if self.results.is_empty() {
            return None;
        }
        let mut any_success = false;
        let mut any_failure = false;
        for result in self.results.values() {
            match result.status {
                ChannelStatus::Success | ChannelStatus::DryRun => any_success = true,
                ChannelStatus::Failed => any_failure = true,
                ChannelStatus::Skipped => {}
            }
        }
        Some(match (any_success, any_failure) {
            (true, false) => JobStatus::Completed,
            (true, true) => JobStatus::Partial,
            (false, true) => JobStatus::Failed,
            (false, false) => JobStatus::Failed,
        })
    }
}

pub fn compute_fingerprint(
    document_id: &str,
    channels: &[Channel],
    content_hash: &str,
    scheduled_for: Option<DateTime<Utc>>,
) -> String {
    let mut normalized: Vec<&'static str> = channels.iter().map(Channel::as_str).collect();
    normalized.sort_unstable();

    let bucket = scheduled_for
        .map(|t| t.format("%Y%m%d%H%M").to_string())
        .unwrap_or_else(|| "immediate".to_string());

    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(content_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.as_bytes());
    hex::encode(hasher.finalize())
}

/// Static per-channel limits, returned by `Publisher::limits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLimits {
    pub subject_max: Option<usize>,
    pub body_max: usize,
    pub rate_per_hour: u64,
    pub batch_size: usize,
    pub media_limit: usize,
}

/// Process-wide dry-run configuration, captured once at startup plus a
/// per-job override (§9: no global mutable singleton — this is an
/// explicitly-threaded immutable value).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DryRunSettings {
    pub global: bool,
}

impl DryRunSettings {
    pub fn effective(&self, job_dry_run: bool) -> bool {
        self.global || job_dry_run
    }
}

/// Circuit breaker state, per channel. A small tagged record mutated by
/// compare-and-set rather than an inheritance-based state machine (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed {
            consecutive_failures: 0,
        }
    }
}

/// A job state transition phase, for event emission (§4.4, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    Progress,
    Finished,
}

/// Pushed to EventBus subscribers (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub correlation_id: String,
    pub channel: Option<Channel>,
    pub phase: JobPhase,
    pub status: Option<ChannelStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Raw content bundle returned by a `ContentSource`, pre-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContent {
    pub document_id: String,
    pub items: Vec<serde_json::Value>,
}

/// Locator for a validation issue/warning, e.g. `body[3].title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPath(pub String);

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FieldPath {
    pub fn index(base: &str, idx: usize) -> Self {
        FieldPath(format!("{base}[{idx}]"))
    }

    pub fn field(&self, name: &str) -> Self {
        FieldPath(format!("{}.{}", self.0, name))
    }

    pub fn root() -> Self {
        FieldPath(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: FieldPath,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: FieldPath,
    pub message: String,
}

/// Current job-state schema version, for on-disk compatibility checks.
pub const CURRENT_STATE_VERSION: &str = "distro.state.v1";
/// Current job-receipt schema version.
pub const CURRENT_RECEIPT_VERSION: &str = "distro.receipt.v1";

/// Durable record of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReceipt {
    pub receipt_version: String,
    pub job: SyncJob,
    pub event_log_path: Option<std::path::PathBuf>,
}

/// External capability: given a document id, produce the raw content bundle
/// a Validator can turn into `ContentItem`s. Real implementations (Google
/// Docs, Notion, a URL reader) are boundary adapters; this crate only
/// specifies the contract and ships in-memory implementations for tests.
pub trait ContentSource: Send + Sync {
    fn fetch(&self, document_id: &str) -> anyhow::Result<RawContent>;
}

/// External capability: render a validated `ContentItem` plus a channel and
/// optional template id into a channel-specific `ContentArtifact`.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        item: &ContentItem,
        channel: Channel,
        template: Option<&str>,
    ) -> anyhow::Result<ContentArtifact>;
}

/// A validation outcome for channel-specific `Publisher::validate`: either
/// the artifact is acceptable as-is, or a list of human-readable issues
/// explains why it isn't.
pub type PublishValidation = Result<(), Vec<String>>;

/// The closed set of channel Publishers (§4.2, §9). Registration is
/// explicit by channel id; there is no reflective discovery.
pub trait Publisher: Send + Sync {
    fn channel(&self) -> Channel;

    /// Channel-specific constraints (e.g. subject length, code-point caps).
    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation;

    /// Side-effect-free preview, same shape as `publish`'s dry-run result.
    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult;

    /// Perform the real send when `dry_run` is false; otherwise behaves like
    /// `preview` but the result still reports `status = dry_run`.
    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult;

    fn limits(&self) -> ChannelLimits;
}
