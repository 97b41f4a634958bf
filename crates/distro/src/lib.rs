//! # distro
//!
//! Core library for the multi-channel content distribution pipeline: fetch a
//! document, validate and render it per channel, publish with retries and
//! circuit breaking, and fan results back out through an event bus.
//!
//! ## Pipeline
//!
//! The core flow is **fetch → validate → render → publish**:
//!
//! 1. [`source`] fetches the raw document bundle for a document id.
//! 2. [`validator`] turns raw content into validated [`distro_types::ContentItem`]s,
//!    collecting issues and warnings rather than failing the whole batch.
//! 3. [`tone`] personalizes copy per channel/audience before rendering.
//! 4. [`render`] turns a validated item into a channel-specific artifact.
//! 5. [`publisher`] implements the five channel backends; [`resilient`]
//!    wraps each one with retry and circuit-breaker policy from
//!    `distro-retry`/`distro-circuit`.
//! 6. [`orchestrator`] fans a job out across channels, one thread per
//!    channel bounded by [`workerpool`], and emits
//!    [`distro_types::JobEvent`]s to `distro-events::EventBus`.
//! 7. [`scheduler`] holds jobs for `scheduled_for`, enforces per-channel
//!    rate limits via [`ratelimit`], and runs the weekly batch planner in
//!    [`batch`].
//! 8. [`api`] exposes the whole surface as plain methods, transport-agnostic.
//! 9. [`pipeline`] is the driver: constructed once from a
//!    `distro_config::DistroConfig`, its `drive_pending` method releases due
//!    jobs from the scheduler and runs steps 1–6 against them.
//!
//! ## Concurrency model
//!
//! Deliberately simple: `std::thread` plus `std::sync::mpsc`/`Mutex`, no
//! async runtime. Jobs are short-lived (seconds to low minutes) and channel
//! counts are small (five), so a thread-per-channel fan-out bounded by a
//! worker pool is enough concurrency without the complexity of an async
//! executor.

/// Transport-agnostic external surface: submit/get/list/cancel/retry jobs,
/// validate content, invalidate caches, report health.
pub mod api;

/// Weekly batch distribution planner with per-section quotas.
pub mod batch;

/// Process-wide and per-job dry-run resolution.
pub mod dryrun;

/// In-memory single-flight lock keyed by job fingerprint.
pub mod lock;

/// Fans a job out across channels and aggregates the final status.
pub mod orchestrator;

/// The five channel `Publisher` implementations.
pub mod publisher;

/// Wires a `DistroConfig` to the rest of the crate and drives released jobs
/// through validate → render → publish.
pub mod pipeline;

/// Per-channel token-bucket rate limiting.
pub mod ratelimit;

/// Turns a validated `ContentItem` into a channel-specific artifact.
pub mod render;

/// Minimal progress-reporting trait, independent of the event log.
pub mod reporter;

/// Retry + circuit-breaker decorator around any `Publisher`.
pub mod resilient;

/// Scheduling: delayed release, rate limiting, batch planning.
pub mod scheduler;

/// In-memory `ContentSource` implementation for tests and local use.
pub mod source;

/// Tone/personalization pass applied before rendering.
pub mod tone;

/// Raw-to-validated content conversion.
pub mod validator;

/// Fixed-size thread pool bounding job concurrency.
pub mod workerpool;
