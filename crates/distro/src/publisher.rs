//! The five channel `Publisher` implementations (§4.2).
//!
//! Each publisher owns a `ChannelBackend` trait object (the actual network
//! call, mockable in tests) and a `RateBucket`. Publishers are re-entrant
//! and share no mutable state with each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use distro_types::{
    Channel, ChannelError, ChannelLimits, ChannelResult, ChannelStatus, ContentArtifact,
    ErrorKind, Publisher, PublishValidation,
};

use crate::ratelimit::RateBucket;

/// How long a publish will wait for rate-limit budget to free up before
/// failing the channel outright (§4.5).
const RATE_WAIT_BUDGET: Duration = Duration::from_secs(60);

/// The actual outbound call a channel makes. Separated from `Publisher` so
/// tests can inject failures without touching the real network.
pub trait ChannelBackend: Send + Sync {
    /// Performs the send. `Ok` carries an optional upstream content id and
    /// URL; `Err` carries the classified failure.
    fn send(&self, artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendReceipt {
    pub sent: Option<u64>,
    pub content_id: Option<String>,
    pub url: Option<String>,
}

fn result(
    channel: Channel,
    status: ChannelStatus,
    receipt: Option<BackendReceipt>,
    error: Option<ChannelError>,
    attempts: u32,
) -> ChannelResult {
    let receipt = receipt.unwrap_or_default();
    ChannelResult {
        channel,
        status,
        sent: receipt.sent,
        content_id: receipt.content_id,
        url: receipt.url,
        error,
        timestamp: Utc::now(),
        attempts,
    }
}

/// Batches recipients up to `limits().batch_size`; `ChannelResult.sent`
/// reflects recipients accepted by the backend.
pub struct EmailPublisher {
    backend: Box<dyn ChannelBackend>,
    rate: RateBucket,
    subject_max: usize,
}

impl EmailPublisher {
    pub fn new(backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self {
            backend,
            rate: RateBucket::new(rate_per_hour, batch_size),
            subject_max: 100,
        }
    }
}

impl Publisher for EmailPublisher {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        let mut issues = Vec::new();
        match &artifact.subject {
            Some(subject) if subject.chars().count() > self.subject_max => {
                issues.push(format!("subject exceeds {} characters", self.subject_max));
            }
            None => issues.push("email artifact requires a subject".into()),
            _ => {}
        }
        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }

    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        result(Channel::Email, ChannelStatus::DryRun, None, None, 1)
            .tap_content_id(artifact.content_id.clone())
    }

    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        if dry_run {
            return self.preview(artifact);
        }
        if !self.rate.acquire_within(RATE_WAIT_BUDGET) {
            return result(
                Channel::Email,
                ChannelStatus::Failed,
                None,
                Some(ChannelError::new(ErrorKind::RateLimited, "email rate limit exceeded")),
                0,
            );
        }
        match self.backend.send(artifact) {
            Ok(receipt) => result(Channel::Email, ChannelStatus::Success, Some(receipt), None, 1),
            Err(err) => result(Channel::Email, ChannelStatus::Failed, None, Some(err), 1),
        }
    }

    fn limits(&self) -> ChannelLimits {
        ChannelLimits {
            subject_max: Some(self.subject_max),
            body_max: 100_000,
            rate_per_hour: 500,
            batch_size: 500,
            media_limit: 0,
        }
    }
}

/// Idempotent upsert keyed by `ContentItem.id` (§4.2): repeated publishes of
/// identical content return the prior `content_id` with `status=success`
/// and no new backend call.
pub struct WebPublisher {
    backend: Box<dyn ChannelBackend>,
    rate: RateBucket,
    published: Mutex<HashMap<String, BackendReceipt>>,
}

impl WebPublisher {
    pub fn new(backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self {
            backend,
            rate: RateBucket::new(rate_per_hour, batch_size),
            published: Mutex::new(HashMap::new()),
        }
    }
}

impl Publisher for WebPublisher {
    fn channel(&self) -> Channel {
        Channel::Web
    }

    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        if artifact.body.trim().is_empty() {
            Err(vec!["web artifact body must not be empty".into()])
        } else {
            Ok(())
        }
    }

    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        result(Channel::Web, ChannelStatus::DryRun, None, None, 1)
            .tap_content_id(artifact.content_id.clone())
    }

    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        if dry_run {
            return self.preview(artifact);
        }

        let mut published = self.published.lock().unwrap();
        if let Some(existing) = published.get(&artifact.content_id) {
            return result(Channel::Web, ChannelStatus::Success, Some(existing.clone()), None, 1);
        }
        drop(published);

        if !self.rate.acquire_within(RATE_WAIT_BUDGET) {
            return result(
                Channel::Web,
                ChannelStatus::Failed,
                None,
                Some(ChannelError::new(ErrorKind::RateLimited, "web rate limit exceeded")),
                0,
            );
        }

        match self.backend.send(artifact) {
            Ok(receipt) => {
                self.published
                    .lock()
                    .unwrap()
                    .insert(artifact.content_id.clone(), receipt.clone());
                result(Channel::Web, ChannelStatus::Success, Some(receipt), None, 1)
            }
            Err(err) => result(Channel::Web, ChannelStatus::Failed, None, Some(err), 1),
        }
    }

    fn limits(&self) -> ChannelLimits {
        ChannelLimits {
            subject_max: None,
            body_max: 500_000,
            rate_per_hour: 200,
            batch_size: 50,
            media_limit: 20,
        }
    }
}

const TWITTER_CODE_POINT_LIMIT: usize = 280;

/// Hard 280 code-point limit after hashtag/link expansion; only `text` is
/// truncated, never the hashtags or link (§4.2).
pub struct TwitterPublisher {
    backend: Box<dyn ChannelBackend>,
    rate: RateBucket,
}

impl TwitterPublisher {
    pub fn new(backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self {
            backend,
            rate: RateBucket::new(rate_per_hour, batch_size),
        }
    }

    /// Composes `text + hashtags + link`, truncating `text` to stay within
    /// the 280 code-point hard limit.
    pub fn compose(artifact: &ContentArtifact) -> String {
        let suffix = compose_suffix(artifact);
        let suffix_len = suffix.chars().count();
        let budget = TWITTER_CODE_POINT_LIMIT.saturating_sub(suffix_len);
        let text: String = artifact.body.chars().take(budget).collect();
        format!("{text}{suffix}")
    }
}

fn compose_suffix(artifact: &ContentArtifact) -> String {
    let mut suffix = String::new();
    if !artifact.hashtags.is_empty() {
        suffix.push(' ');
        suffix.push_str(&artifact.hashtags.join(" "));
    }
    if let Some(link) = &artifact.link {
        suffix.push(' ');
        suffix.push_str(link);
    }
    suffix
}

impl Publisher for TwitterPublisher {
    fn channel(&self) -> Channel {
        Channel::SocialTwitter
    }

    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        let composed = Self::compose(artifact);
        if composed.chars().count() > TWITTER_CODE_POINT_LIMIT {
            Err(vec![format!(
                "composed tweet exceeds {TWITTER_CODE_POINT_LIMIT} code points"
            )])
        } else {
            Ok(())
        }
    }

    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        result(Channel::SocialTwitter, ChannelStatus::DryRun, None, None, 1)
            .tap_content_id(artifact.content_id.clone())
    }

    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        if dry_run {
            return self.preview(artifact);
        }
        if !self.rate.acquire_within(RATE_WAIT_BUDGET) {
            return result(
                Channel::SocialTwitter,
                ChannelStatus::Failed,
                None,
                Some(ChannelError::new(ErrorKind::RateLimited, "twitter rate limit exceeded")),
                0,
            );
        }
        match self.backend.send(artifact) {
            Ok(receipt) => result(Channel::SocialTwitter, ChannelStatus::Success, Some(receipt), None, 1),
            Err(err) => result(Channel::SocialTwitter, ChannelStatus::Failed, None, Some(err), 1),
        }
    }

    fn limits(&self) -> ChannelLimits {
        ChannelLimits {
            subject_max: None,
            body_max: TWITTER_CODE_POINT_LIMIT,
            rate_per_hour: 100,
            batch_size: 25,
            media_limit: 4,
        }
    }
}

/// Shared implementation for LinkedIn and Facebook: both follow their own
/// rendering templates and default to a professional/community tone, but
/// otherwise behave identically from the Publisher contract's perspective.
struct SocialPublisher {
    channel: Channel,
    backend: Box<dyn ChannelBackend>,
    rate: RateBucket,
}

impl SocialPublisher {
    fn new(channel: Channel, backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self {
            channel,
            backend,
            rate: RateBucket::new(rate_per_hour, batch_size),
        }
    }
}

impl Publisher for SocialPublisher {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        if artifact.body.trim().is_empty() {
            Err(vec!["post body must not be empty".into()])
        } else {
            Ok(())
        }
    }

    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        result(self.channel, ChannelStatus::DryRun, None, None, 1)
            .tap_content_id(artifact.content_id.clone())
    }

    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        if dry_run {
            return self.preview(artifact);
        }
        if !self.rate.acquire_within(RATE_WAIT_BUDGET) {
            return result(
                self.channel,
                ChannelStatus::Failed,
                None,
                Some(ChannelError::new(ErrorKind::RateLimited, "rate limit exceeded")),
                0,
            );
        }
        match self.backend.send(artifact) {
            Ok(receipt) => result(self.channel, ChannelStatus::Success, Some(receipt), None, 1),
            Err(err) => result(self.channel, ChannelStatus::Failed, None, Some(err), 1),
        }
    }

    fn limits(&self) -> ChannelLimits {
        ChannelLimits {
            subject_max: None,
            body_max: 3_000,
            rate_per_hour: 100,
            batch_size: 25,
            media_limit: 10,
        }
    }
}

pub struct LinkedInPublisher(SocialPublisher);

impl LinkedInPublisher {
    pub fn new(backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self(SocialPublisher::new(Channel::SocialLinkedIn, backend, rate_per_hour, batch_size))
    }
}

impl Publisher for LinkedInPublisher {
    fn channel(&self) -> Channel {
        self.0.channel()
    }
    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        self.0.validate(artifact)
    }
    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        self.0.preview(artifact)
    }
    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        self.0.publish(artifact, dry_run)
    }
    fn limits(&self) -> ChannelLimits {
        self.0.limits()
    }
}

pub struct FacebookPublisher(SocialPublisher);

impl FacebookPublisher {
    pub fn new(backend: Box<dyn ChannelBackend>, rate_per_hour: u64, batch_size: usize) -> Self {
        Self(SocialPublisher::new(Channel::SocialFacebook, backend, rate_per_hour, batch_size))
    }
}

impl Publisher for FacebookPublisher {
    fn channel(&self) -> Channel {
        self.0.channel()
    }
    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        self.0.validate(artifact)
    }
    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        self.0.preview(artifact)
    }
    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        self.0.publish(artifact, dry_run)
    }
    fn limits(&self) -> ChannelLimits {
        self.0.limits()
    }
}

trait TapContentId {
    fn tap_content_id(self, content_id: String) -> Self;
}

impl TapContentId for ChannelResult {
    fn tap_content_id(mut self, content_id: String) -> Self {
        self.content_id = Some(content_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    impl ChannelBackend for AlwaysOk {
        fn send(&self, artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError> {
            Ok(BackendReceipt {
                sent: Some(1),
                content_id: Some(artifact.content_id.clone()),
                url: Some(format!("/updates/{}", artifact.content_id)),
            })
        }
    }

    struct AlwaysFail;
    impl ChannelBackend for AlwaysFail {
        fn send(&self, _artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError> {
            Err(ChannelError::new(ErrorKind::Backend5xx, "server error"))
        }
    }

    fn artifact(channel: Channel) -> ContentArtifact {
        ContentArtifact {
            channel,
            content_id: "doc-1-abcd".into(),
            subject: Some("Weekly Progress".into()),
            body: "We shipped things.".into(),
            hashtags: vec!["#release".into()],
            link: Some("https://example.com/updates/doc-1-abcd".into()),
            media: vec![],
        }
    }

    #[test]
    fn web_publish_is_idempotent_by_content_id() {
        let publisher = WebPublisher::new(Box::new(AlwaysOk), 3600, 10);
        let a = artifact(Channel::Web);
        let first = publisher.publish(&a, false);
        let second = publisher.publish(&a, false);
        assert_eq!(first.content_id, second.content_id);
        assert_eq!(second.status, ChannelStatus::Success);
    }

    #[test]
    fn dry_run_never_calls_backend() {
        let publisher = WebPublisher::new(Box::new(AlwaysFail), 3600, 10);
        let result = publisher.publish(&artifact(Channel::Web), true);
        assert_eq!(result.status, ChannelStatus::DryRun);
    }

    #[test]
    fn twitter_compose_truncates_text_only() {
        let mut a = artifact(Channel::SocialTwitter);
        a.body = "x".repeat(400);
        let composed = TwitterPublisher::compose(&a);
        assert!(composed.chars().count() <= TWITTER_CODE_POINT_LIMIT);
        assert!(composed.ends_with(&a.link.clone().unwrap()));
    }

    #[test]
    fn twitter_validate_rejects_overlong_composition() {
        let publisher = TwitterPublisher::new(Box::new(AlwaysOk), 3600, 10);
        let mut a = artifact(Channel::SocialTwitter);
        a.body = "x".repeat(400);
        a.hashtags = vec!["#".repeat(300)];
        assert!(publisher.validate(&a).is_err());
    }

    #[test]
    fn email_requires_subject() {
        let publisher = EmailPublisher::new(Box::new(AlwaysOk), 3600, 10);
        let mut a = artifact(Channel::Email);
        a.subject = None;
        assert!(publisher.validate(&a).is_err());
    }

    #[test]
    fn linkedin_and_facebook_publish_success() {
        let linkedin = LinkedInPublisher::new(Box::new(AlwaysOk), 3600, 10);
        let facebook = FacebookPublisher::new(Box::new(AlwaysOk), 3600, 10);
        assert_eq!(
            linkedin.publish(&artifact(Channel::SocialLinkedIn), false).status,
            ChannelStatus::Success
        );
        assert_eq!(
            facebook.publish(&artifact(Channel::SocialFacebook), false).status,
            ChannelStatus::Success
        );
    }
}
