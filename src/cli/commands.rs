//! CLI command definitions for gitcollector.
//!
//! `download` mirrors every repository of one or more GitHub organizations
//! into the library, refreshing the repositories already there unless told
//! otherwise. `update` only refreshes what the library already holds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::discovery::{
    DiscoveryProvider, GitHubIterConfig, GitHubOrgIter, ProviderHandle, ProviderOpts,
    UpdatesProvider,
};
use crate::error::{ErrorKind, ProviderError};
use crate::library::{GitLibrary, GitLibraryConfig, LibraryJob, LibraryScheduleFn};
use crate::metrics::{export_metrics, init_metrics, JobMetrics};
use crate::scheduler::{
    JobQueue, JobScheduler, JobSchedulerOpts, MetricsCollector, WorkerPool, WorkerPoolConfig,
};

/// Default capacity of each job queue.
const DEFAULT_QUEUE_SIZE: usize = 50;

/// Mirror GitHub organizations into a local library of bare repositories.
#[derive(Parser)]
#[command(name = "gitcollector")]
#[command(about = "Mirror GitHub organizations into a local git library")]
#[command(version)]
#[command(
    long_about = "gitcollector discovers the repositories of GitHub organizations and keeps bare mirrors of them in a local library.\n\nExample usage:\n  gitcollector download --library ./library --orgs src-d,bblfsh --workers 8\n  gitcollector update --library ./library"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Download the repositories of GitHub organizations.
    #[command(alias = "dl")]
    Download(DownloadArgs),

    /// Update every repository already in the library.
    Update(UpdateArgs),
}

/// Options shared by every command.
#[derive(Parser, Debug, Clone)]
pub struct PoolArgs {
    /// Library directory holding the mirrors.
    #[arg(long, env = "GITCOLLECTOR_LIBRARY")]
    pub library: PathBuf,

    /// Number of workers (0 uses twice the number of CPUs).
    #[arg(short, long, default_value = "0")]
    pub workers: usize,

    /// Capacity of each job queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE)]
    pub queue_size: usize,

    /// Per-job time limit in seconds. Jobs run unbounded when unset.
    #[arg(long)]
    pub job_timeout: Option<u64>,

    /// Print Prometheus metrics to stdout when done.
    #[arg(long)]
    pub print_metrics: bool,
}

impl PoolArgs {
    fn num_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }

    fn pool_config(&self) -> WorkerPoolConfig {
        let config = WorkerPoolConfig::new(self.num_workers());
        match self.job_timeout {
            Some(secs) => config.with_job_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

/// Arguments for `gitcollector download`.
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Comma-separated GitHub organizations.
    #[arg(long, env = "GITCOLLECTOR_ORGS", value_delimiter = ',', required = true)]
    pub orgs: Vec<String>,

    /// GitHub API token.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Don't update repositories already in the library.
    #[arg(long)]
    pub no_updates: bool,

    /// Skip forked repositories.
    #[arg(long)]
    pub no_forks: bool,

    /// Skip archived repositories.
    #[arg(long)]
    pub no_archived: bool,

    /// Keep polling organizations for new repositories until interrupted.
    #[arg(long)]
    pub wait_new_repos: bool,

    /// Wait for rate limits to reset instead of stopping.
    #[arg(long)]
    pub wait_on_rate_limit: bool,

    /// Seconds between polls for new repositories.
    #[arg(long, default_value = "3600")]
    pub poll_interval: u64,

    /// Seconds to wait for a free queue slot before buffering a job.
    #[arg(long, default_value = "5")]
    pub enqueue_timeout: u64,

    /// Seconds to wait for providers to acknowledge a stop.
    #[arg(long, default_value = "10")]
    pub stop_timeout: u64,
}

impl DownloadArgs {
    /// Library settings for a download run.
    ///
    /// Present repositories are never fetched by download jobs: the updates
    /// provider already queues one update per mirror, and `--no-updates`
    /// leaves them alone.
    fn library_config(&self) -> GitLibraryConfig {
        GitLibraryConfig::new(&self.pool.library)
            .with_update_on_download(false)
            .with_auth_token(self.token.clone())
    }
}

/// Arguments for `gitcollector update`.
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Download(args) => {
            run_download_command(args).await?;
        }
        Commands::Update(args) => {
            run_update_command(args).await?;
        }
    }
    Ok(())
}

async fn run_download_command(args: DownloadArgs) -> anyhow::Result<()> {
    let orgs: Vec<String> = args
        .orgs
        .iter()
        .map(|org| org.trim().to_string())
        .filter(|org| !org.is_empty())
        .collect();
    if orgs.is_empty() {
        anyhow::bail!("No organizations given");
    }

    init_metrics().context("Failed to initialize metrics")?;

    let library = Arc::new(GitLibrary::new(args.library_config()));
    let metrics = Arc::new(JobMetrics::new());

    let downloads = Arc::new(JobQueue::new("download", args.pool.queue_size));
    metrics.track_queue(Arc::clone(&downloads));

    let (schedule, updates) = if args.no_updates {
        let schedule = LibraryScheduleFn::download_only(Arc::clone(&downloads), library.download_fn());
        (schedule, None)
    } else {
        let updates = Arc::new(JobQueue::new("update", args.pool.queue_size));
        metrics.track_queue(Arc::clone(&updates));
        let provider = UpdatesProvider::new(Arc::clone(&library), Arc::clone(&updates))
            .with_metrics(metrics.clone());
        let schedule = LibraryScheduleFn::combined(
            Arc::clone(&downloads),
            updates,
            library.download_fn(),
            library.update_fn(),
        );
        (schedule, Some(provider))
    };

    let pool = WorkerPool::new(
        JobScheduler::new(schedule, JobSchedulerOpts::default()),
        metrics.clone(),
        args.pool.pool_config(),
    );

    info!(
        orgs = ?orgs,
        workers = pool.num_workers(),
        library = %args.pool.library.display(),
        "Starting download"
    );
    metrics.start();
    pool.run()?;

    let updates_task = updates.map(|provider| {
        let cancel = provider.cancel_token();
        let task = tokio::spawn(async move { provider.run().await });
        (cancel, task)
    });

    let github_config = GitHubIterConfig::default()
        .with_skip_forks(args.no_forks)
        .with_skip_archived(args.no_archived)
        .with_poll_interval(Duration::from_secs(args.poll_interval));
    let opts = ProviderOpts::new()
        .with_wait_new_repos(args.wait_new_repos)
        .with_wait_on_rate_limit(args.wait_on_rate_limit)
        .with_enqueue_timeout(Duration::from_secs(args.enqueue_timeout))
        .with_stop_timeout(Duration::from_secs(args.stop_timeout));

    let mut handles: Vec<ProviderHandle> = Vec::new();
    let mut tasks = Vec::new();
    for org in orgs {
        let iter = GitHubOrgIter::new(org.clone(), args.token.clone(), github_config.clone())
            .with_context(|| format!("Failed to create source for '{}'", org))?;
        let mut provider = DiscoveryProvider::new(iter, Arc::clone(&downloads), opts.clone())
            .with_metrics(metrics.clone());
        handles.push(provider.handle());
        tasks.push(tokio::spawn(async move {
            let result = provider.start().await;
            (org, result)
        }));
    }

    let providers = join_all(tasks);
    tokio::pin!(providers);
    let results = tokio::select! {
        results = &mut providers => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping providers");
            stop_providers(&handles).await;
            if let Some((cancel, _)) = &updates_task {
                cancel.cancel();
            }
            providers.await
        }
    };

    downloads.close();

    let mut failures = 0;
    for result in results {
        match result {
            Ok((org, Err(e))) => {
                if !report_provider_exit(&org, &e) {
                    failures += 1;
                }
            }
            Ok((_, Ok(()))) => {}
            Err(e) => {
                error!(error = %e, "Provider task panicked");
                failures += 1;
            }
        }
    }

    if let Some((_, task)) = updates_task {
        match task.await {
            Ok(Ok(count)) => info!(count = count, "Update jobs scheduled"),
            Ok(Err(e)) => warn!(error = %e, "Update scheduling stopped early"),
            Err(e) => error!(error = %e, "Updates provider panicked"),
        }
    }

    drain_pool(&pool, metrics.as_ref(), args.pool.print_metrics).await;

    if failures > 0 {
        anyhow::bail!("{} provider(s) failed", failures);
    }
    Ok(())
}

async fn run_update_command(args: UpdateArgs) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;

    let library = Arc::new(GitLibrary::new(GitLibraryConfig::new(&args.pool.library)));
    let metrics = Arc::new(JobMetrics::new());

    let updates: Arc<JobQueue<LibraryJob>> =
        Arc::new(JobQueue::new("update", args.pool.queue_size));
    metrics.track_queue(Arc::clone(&updates));

    let provider =
        UpdatesProvider::new(Arc::clone(&library), Arc::clone(&updates)).with_metrics(metrics.clone());
    let schedule = LibraryScheduleFn::update_only(Arc::clone(&updates), library.update_fn());
    let pool = WorkerPool::new(
        JobScheduler::new(schedule, JobSchedulerOpts::default()),
        metrics.clone(),
        args.pool.pool_config(),
    );

    info!(
        workers = pool.num_workers(),
        library = %args.pool.library.display(),
        "Starting update"
    );
    metrics.start();
    pool.run()?;

    let cancel = provider.cancel_token();
    let scheduled = tokio::select! {
        result = provider.run() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, no more updates will be scheduled");
            cancel.cancel();
            updates.close();
            Err(ProviderError::stopped())
        }
    };

    match scheduled {
        Ok(count) => info!(count = count, "Update jobs scheduled"),
        Err(e) if e.is(ErrorKind::ProviderStopped) => {}
        Err(e) => {
            drain_pool(&pool, metrics.as_ref(), args.pool.print_metrics).await;
            return Err(anyhow::Error::new(e).context("Failed to list library repositories"));
        }
    }

    drain_pool(&pool, metrics.as_ref(), args.pool.print_metrics).await;
    Ok(())
}

async fn stop_providers(handles: &[ProviderHandle]) {
    let results = join_all(handles.iter().map(|handle| handle.stop())).await;
    for result in results {
        if let Err(e) = result {
            warn!(error = %e, "Provider did not stop in time");
        }
    }
}

/// Logs how a provider ended. Returns false for failures.
fn report_provider_exit(org: &str, err: &ProviderError) -> bool {
    if !err.is(ErrorKind::ProviderStopped) {
        error!(org = %org, error = %err, "Provider failed");
        return false;
    }

    match err.cause_kind() {
        Some(ErrorKind::NewRepositoriesNotFound) | None => {
            info!(org = %org, "Provider finished");
            true
        }
        Some(cause) => {
            warn!(org = %org, reason = %cause, "Provider stopped early");
            true
        }
    }
}

/// Waits for the pool to finish its queues. A second interrupt cancels
/// in-flight jobs.
async fn drain_pool(pool: &WorkerPool, metrics: &JobMetrics, print_metrics: bool) {
    tokio::select! {
        _ = pool.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling running jobs");
            pool.stop(true);
            pool.wait().await;
        }
    }

    metrics.stop(false);

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        success_rate = %format!("{:.1}%", stats.success_rate()),
        average_ms = stats.average_job_duration.as_millis() as u64,
        "Worker pool finished"
    );

    if print_metrics {
        println!("{}", export_metrics());
    }
}
