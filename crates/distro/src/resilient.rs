//! Retry + circuit-breaker decorator around any `Publisher` (§4.3).
//!
//! Wraps a single channel's `Publisher` with a `RetryExecutor` and a
//! `CircuitBreaker`. When the circuit is open, `publish` fails fast without
//! consuming a retry attempt or calling the inner publisher. On terminal
//! failure, a configured webhook fires a dead-letter notification
//! out-of-band; the caller is never blocked on it.

use chrono::Utc;
use distro_circuit::{Admission, CircuitBreaker, CircuitConfig};
use distro_retry::{should_retry, RetryExecutor, RetryStrategyConfig};
use distro_types::{
    ChannelError, ChannelResult, ChannelStatus, ContentArtifact, ErrorKind, Publisher,
    PublishValidation,
};
use distro_webhook::{dead_letter_payload, send_webhook_fire_and_forget, WebhookConfig};

pub struct ResilientPublisher<P: Publisher> {
    inner: P,
    retry_config: RetryStrategyConfig,
    circuit: CircuitBreaker,
    dead_letter: Option<WebhookConfig>,
}

impl<P: Publisher> ResilientPublisher<P> {
    pub fn new(inner: P, retry_config: RetryStrategyConfig, circuit_config: CircuitConfig) -> Self {
        Self {
            inner,
            retry_config,
            circuit: CircuitBreaker::new(circuit_config),
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, webhook: WebhookConfig) -> Self {
        self.dead_letter = Some(webhook);
        self
    }

    fn publish_inner(&self, artifact: &ContentArtifact, dry_run: bool, job_id: &str) -> ChannelResult {
        if dry_run {
            return self.inner.publish(artifact, true);
        }

        if self.circuit.admit() == Admission::ShortCircuit {
            return ChannelResult {
                channel: self.inner.channel(),
                status: ChannelStatus::Failed,
                sent: None,
                content_id: None,
                url: None,
                error: Some(ChannelError::new(ErrorKind::CircuitOpen, "circuit_open")),
                timestamp: Utc::now(),
                attempts: 0,
            };
        }

        let inner = &self.inner;
        let circuit = &self.circuit;
        let op = |_attempt: u32| -> Result<ChannelResult, ChannelError> {
            let result = inner.publish(artifact, false);
            match &result.error {
                None => {
                    if result.status == ChannelStatus::Success {
                        circuit.record(true);
                    }
                    Ok(result)
                }
                Some(err) => {
                    if err.kind.counts_toward_circuit() {
                        circuit.record(false);
                    }
                    Err(err.clone())
                }
            }
        };
        let classify = |err: &ChannelError| should_retry(err.kind);
        let outcome = RetryExecutor::new(self.retry_config.clone()).run(op, classify);

        match outcome {
            Ok(result) => result,
            Err((err, attempts)) => {
                let failed = ChannelResult {
                    channel: self.inner.channel(),
                    status: ChannelStatus::Failed,
                    sent: None,
                    content_id: None,
                    url: None,
                    error: Some(err.clone()),
                    timestamp: Utc::now(),
                    attempts,
                };
                if let Some(webhook) = &self.dead_letter {
                    let payload = dead_letter_payload(job_id, self.inner.channel(), &err.message);
                    send_webhook_fire_and_forget(webhook.clone(), payload);
                }
                failed
            }
        }
    }
}

impl<P: Publisher> Publisher for ResilientPublisher<P> {
    fn channel(&self) -> distro_types::Channel {
        self.inner.channel()
    }

    fn validate(&self, artifact: &ContentArtifact) -> PublishValidation {
        self.inner.validate(artifact)
    }

    fn preview(&self, artifact: &ContentArtifact) -> ChannelResult {
        self.inner.preview(artifact)
    }

    fn publish(&self, artifact: &ContentArtifact, dry_run: bool) -> ChannelResult {
        self.publish_inner(artifact, dry_run, "")
    }

    fn limits(&self) -> distro_types::ChannelLimits {
        self.inner.limits()
    }
}

impl<P: Publisher> ResilientPublisher<P> {
    /// Same as `Publisher::publish` but threads a job id through for
    /// dead-letter payloads. The orchestrator calls this directly rather
    /// than going through the trait, which has no job context.
    pub fn publish_for_job(&self, artifact: &ContentArtifact, dry_run: bool, job_id: &str) -> ChannelResult {
        self.publish_inner(artifact, dry_run, job_id)
    }

    pub fn circuit_state(&self) -> distro_types::CircuitState {
        self.circuit.state()
    }
}
