use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use distro::api::{JobSurface, SubmitSyncJobRequest};
use distro::pipeline::Pipeline;
use distro::publisher::{
    BackendReceipt, ChannelBackend, EmailPublisher, FacebookPublisher, LinkedInPublisher, TwitterPublisher,
    WebPublisher,
};
use distro::reporter::Reporter;
use distro::resilient::ResilientPublisher;
use distro::scheduler::Scheduler;
use distro::source::MemorySource;
use distro_cache::{CacheCoordinator, CacheStats};
use distro_config::DistroConfig;
use distro_events::EventBus;
use distro_store::{FileStore, JobStore};
use distro_types::{Channel, ChannelError, ContentArtifact, ContentKind, ErrorKind, JobStatus, Publisher};

#[derive(Parser, Debug)]
#[command(name = "distro", version)]
#[command(about = "Multi-channel content distribution pipeline")]
struct Cli {
    /// Directory for job state, caches, and config (default: .distro)
    #[arg(long, default_value = ".distro")]
    state_dir: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a new sync job for a document.
    Submit {
        /// Document id to fetch and distribute.
        document_id: String,
        /// Channels to publish to (repeatable): email, web, social_twitter, social_linkedin, social_facebook.
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,
        /// Content type: update, blog, announcement, session_summary.
        #[arg(long = "content-type", default_value = "update")]
        content_type: String,
        /// Per-job template override.
        #[arg(long)]
        template: Option<String>,
        /// Preview only; no channel performs a real send.
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch a job by id.
    Get { job_id: String },
    /// List jobs, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Cancel a non-terminal job.
    Cancel { job_id: String },
    /// Resubmit a job's inputs as a new job.
    Retry { job_id: String },
    /// Validate a content draft without submitting it.
    Validate {
        /// Document id the draft would be submitted under.
        document_id: String,
        /// Path to a JSON file containing the draft content item.
        draft_file: PathBuf,
        /// Content type to inject when the draft has no `kind` field.
        #[arg(long = "content-type", default_value = "update")]
        content_type: String,
        /// Promote warnings to issues.
        #[arg(long)]
        strict: bool,
    },
    /// Invalidate cache entries by key.
    InvalidateCache { key: String },
    /// Report cache hit/miss counters.
    CacheStats,
    /// Report liveness.
    Health,
    /// Report readiness (liveness plus channel circuit states).
    Ready,
    /// Report pipeline counters.
    Metrics,
    /// Release due jobs and drive them to completion through the full
    /// validate/render/publish pipeline.
    Drive {
        /// Keep driving on a fixed interval instead of running once.
        #[arg(long)]
        watch: bool,
        /// Interval between drive ticks when `--watch` is set (e.g. "5s", "1m").
        #[arg(long, default_value = "5s")]
        interval: String,
    },
    /// Generate shell completion scripts.
    Completions { shell: Shell },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Writes each published artifact to `<state_dir>/outbox/<channel>/<content_id>.json`
/// instead of calling a real network endpoint — channel delivery is an
/// external capability this crate treats as pluggable, and a file sink keeps
/// `distro drive` runnable with nothing else configured. Writes atomically
/// (tmp file + rename) the same way `FileStore` persists job state.
struct FileChannelBackend {
    dir: PathBuf,
}

impl FileChannelBackend {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ChannelBackend for FileChannelBackend {
    fn send(&self, artifact: &ContentArtifact) -> Result<BackendReceipt, ChannelError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ChannelError::new(ErrorKind::TransportError, format!("outbox dir: {e}")))?;
        let path = self.dir.join(format!("{}.json", artifact.content_id));
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(artifact)
            .map_err(|e| ChannelError::new(ErrorKind::InternalError, format!("serialize artifact: {e}")))?;
        fs::write(&tmp_path, body)
            .map_err(|e| ChannelError::new(ErrorKind::TransportError, format!("write outbox entry: {e}")))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| ChannelError::new(ErrorKind::TransportError, format!("rename outbox entry: {e}")))?;
        Ok(BackendReceipt {
            sent: Some(1),
            content_id: Some(artifact.content_id.clone()),
            url: Some(format!("file://{}", path.display())),
        })
    }
}

/// Shared store/scheduler so `distro submit` and `distro drive` see the same
/// jobs, plus the `JobSurface` wrapping them for the non-driving subcommands.
fn build_surface(state_dir: &Path) -> (JobSurface, Arc<dyn JobStore>, Arc<Scheduler>) {
    let store: Arc<dyn JobStore> = Arc::new(FileStore::new(state_dir.join("jobs")));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&store)));
    let cache = Arc::new(CacheCoordinator::new(Duration::from_secs(5)));
    let source = Arc::new(MemorySource::new());
    let surface = JobSurface::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        cache,
        source,
        Channel::all().to_vec(),
    );
    (surface, store, scheduler)
}

/// Builds a `Pipeline` wired to a `FileChannelBackend` per channel, each
/// wrapped in a `ResilientPublisher` configured from `.distro.toml`'s retry
/// and circuit sections. Shares `store`/`scheduler` with `build_surface` so
/// `distro submit` and `distro drive` see the same jobs.
fn build_pipeline(
    state_dir: &Path,
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    config: &DistroConfig,
) -> Arc<Pipeline> {
    let source = Arc::new(MemorySource::new());
    let mut publishers: BTreeMap<Channel, Arc<dyn Publisher>> = BTreeMap::new();
    for &channel in Channel::all() {
        let outbox = state_dir.join("outbox").join(channel.as_str());
        let backend: Box<dyn ChannelBackend> = Box::new(FileChannelBackend::new(outbox));
        let rate_per_hour = config.rate_limit_for(channel);
        let retry_config = config.retry_config_for(channel);
        let circuit_config = config.circuit;
        let publisher: Arc<dyn Publisher> = match channel {
            Channel::Email => Arc::new(ResilientPublisher::new(
                EmailPublisher::new(backend, rate_per_hour, 10),
                retry_config,
                circuit_config,
            )),
            Channel::Web => Arc::new(ResilientPublisher::new(
                WebPublisher::new(backend, rate_per_hour, 10),
                retry_config,
                circuit_config,
            )),
            Channel::SocialTwitter => Arc::new(ResilientPublisher::new(
                TwitterPublisher::new(backend, rate_per_hour, 10),
                retry_config,
                circuit_config,
            )),
            Channel::SocialLinkedIn => Arc::new(ResilientPublisher::new(
                LinkedInPublisher::new(backend, rate_per_hour, 10),
                retry_config,
                circuit_config,
            )),
            Channel::SocialFacebook => Arc::new(ResilientPublisher::new(
                FacebookPublisher::new(backend, rate_per_hour, 10),
                retry_config,
                circuit_config,
            )),
        };
        publishers.insert(channel, publisher);
    }

    let events = Arc::new(EventBus::new());
    Arc::new(Pipeline::new(
        store,
        scheduler,
        source,
        Arc::new(distro::render::TemplateRenderer::new()),
        publishers,
        events,
        config,
    ))
}

fn parse_channel(s: &str) -> Result<Channel> {
    s.parse::<Channel>().map_err(|e| anyhow::anyhow!(e))
}

fn parse_content_type(s: &str) -> Result<ContentKind> {
    s.parse::<ContentKind>().map_err(|e| anyhow::anyhow!(e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.cmd {
        clap_complete::generate(shell, &mut Cli::command(), "distro", &mut std::io::stdout());
        return Ok(());
    }

    let mut reporter = CliReporter;
    let (surface, store, scheduler) = build_surface(&cli.state_dir);
    let config = distro_config::load_config(&cli.state_dir).context("failed to load .distro.toml")?;

    match cli.cmd {
        Commands::Completions { .. } => unreachable!("handled above"),
        Commands::Submit { document_id, channels, content_type, template, dry_run } => {
            let channels = channels
                .iter()
                .map(|c| parse_channel(c))
                .collect::<Result<Vec<_>>>()?;
            let content_type = parse_content_type(&content_type)?;
            let response = surface
                .submit_sync_job(SubmitSyncJobRequest {
                    document_id,
                    channels,
                    content_type,
                    template,
                    scheduled_for: None,
                    dry_run,
                    metadata: BTreeMap::new(),
                })
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            reporter.info(&format!("submitted job {} (status={:?})", response.job_id, response.status));
            println!("{}", serde_json::to_string_pretty(&response_to_json(&response))?);
        }
        Commands::Get { job_id } => {
            let job = surface.get_sync_job(&job_id).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::List { status, limit } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let result = surface
                .list_sync_jobs(status, Some(limit), 0)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            for job in &result.jobs {
                println!("{}\t{:?}\t{}", job.job_id, job.status, job.document_id);
            }
            reporter.info(&format!("{} of {} jobs shown", result.jobs.len(), result.total));
        }
        Commands::Cancel { job_id } => {
            let cancelled = surface.cancel_sync_job(&job_id).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if cancelled {
                reporter.info(&format!("job {job_id} cancelled"));
            } else {
                reporter.warn(&format!("job {job_id} could not be cancelled (already terminal?)"));
            }
        }
        Commands::Retry { job_id } => {
            let response = surface.retry_sync_job(&job_id).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            reporter.info(&format!("resubmitted as job {}", response.job_id));
        }
        Commands::Validate { document_id, draft_file, content_type, strict } => {
            let raw = fs::read_to_string(&draft_file)
                .with_context(|| format!("failed to read {}", draft_file.display()))?;
            let draft: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", draft_file.display()))?;
            let content_type = parse_content_type(&content_type)?;
            let response = surface.validate_content(&draft, &document_id, content_type, strict);
            println!("{}", serde_json::to_string_pretty(&validate_response_to_json(&response))?);
            if !response.is_valid {
                std::process::exit(1);
            }
        }
        Commands::InvalidateCache { key } => {
            let response = surface.invalidate_cache(&key);
            reporter.info(&format!("invalidated {} targets for {key}", response.invalidated));
        }
        Commands::CacheStats => {
            // The CLI doesn't hold a long-lived cache instance across
            // invocations, so there is nothing accumulated to report beyond
            // the registered tiers; a long-running embedder would pass its
            // own running `CacheStats` here instead.
            let response = surface.get_cache_stats(CacheStats::default());
            println!("{}", serde_json::to_string_pretty(&response.stats)?);
            for (tier, status) in &response.cache_targets {
                reporter.info(&format!("{tier}: {status}"));
            }
        }
        Commands::Health => {
            match surface.health() {
                distro::api::HealthState::Ok => {
                    reporter.info("ok");
                }
                distro::api::HealthState::Degraded(issues) => {
                    for issue in issues {
                        reporter.error(&issue);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Ready => {
            // A fresh process has no in-memory circuit state to report;
            // readiness here reduces to liveness until circuit state is
            // persisted somewhere a short-lived CLI invocation can read it.
            match surface.ready(&BTreeMap::new()) {
                distro::api::HealthState::Ok => reporter.info("ready"),
                distro::api::HealthState::Degraded(issues) => {
                    for issue in issues {
                        reporter.error(&issue);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Metrics => {
            let metrics = surface.metrics().map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Drive { watch, interval } => {
            let pipeline = build_pipeline(&cli.state_dir, store, scheduler, &config);
            let interval = humantime::parse_duration(&interval)
                .with_context(|| format!("invalid --interval {interval:?}"))?;
            loop {
                let driven = pipeline.drive_pending(&mut reporter);
                if !driven.is_empty() {
                    reporter.info(&format!("drove {} job(s)", driven.len()));
                }
                if !watch {
                    break;
                }
                std::thread::sleep(interval);
            }
        }
    }

    Ok(())
}

fn parse_status(s: &str) -> Result<JobStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("unknown job status: {s}"))
}

fn response_to_json(response: &distro::api::SubmitSyncJobResponse) -> serde_json::Value {
    serde_json::json!({
        "job_id": response.job_id,
        "correlation_id": response.correlation_id,
        "status": response.status,
        "created_at": response.created_at,
        "scheduled_for": response.scheduled_for,
    })
}

fn validate_response_to_json(response: &distro::api::ValidateContentResponse) -> serde_json::Value {
    serde_json::json!({
        "is_valid": response.is_valid,
        "issues": response.issues,
        "warnings": response.warnings,
        "enhanced_metadata": response.enhanced_metadata,
    })
}
