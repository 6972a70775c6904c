use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use analysis_progress::{
    config::Config,
    history::{HistoryAggregator, HistoryQuery, HistoryStatistics, TimeRange},
    models::{AnalysisModule, JobParameters, JobStatus, generate_job_id},
    planner::StepPlanner,
    poll::{PollCoordinator, PollEnd, PollScheduler},
    storage::DualBackendStore,
    tracker::ProgressTracker,
    utils::{format_seconds, now_epoch},
};

#[derive(Parser)]
#[command(name = "analysis-progress")]
#[command(version)]
#[command(about = "Track, inspect and watch the progress of long-running analysis jobs")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Durable store directory (overrides config file)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List recent jobs with statistics
    History {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[arg(short, long, value_enum, default_value = "all")]
        range: HistoryRange,
    },
    /// Print one job's stored record
    Show { job_id: String },
    /// Delete a job from both backends
    Delete { job_id: String },
    /// Report record counts per backend
    Inspect,
    /// Drive a job through its full plan while watching it
    Simulate {
        #[arg(long)]
        job_id: Option<String>,
        #[arg(short, long, value_delimiter = ',', value_parser = parse_module, default_value = "market,fundamentals")]
        modules: Vec<AnalysisModule>,
        #[arg(long)]
        depth: Option<u8>,
        #[arg(short, long, default_value = "openai")]
        provider: String,
        /// Subject recorded in the results
        #[arg(long, default_value = "DEMO")]
        subject: String,
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
        step_delay: Duration,
        /// Fail the job when it reaches this step (zero-based)
        #[arg(long)]
        fail_at: Option<usize>,
    },
    /// Watch an existing job until it finishes
    Watch { job_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum HistoryRange {
    All,
    Today,
    #[value(name = "7d")]
    Week,
    #[value(name = "30d")]
    Month,
}

impl HistoryRange {
    fn time_range(self) -> TimeRange {
        match self {
            HistoryRange::All => TimeRange::all(),
            HistoryRange::Today => TimeRange::today(),
            HistoryRange::Week => TimeRange::last_days(7),
            HistoryRange::Month => TimeRange::last_days(30),
        }
    }
}

fn parse_status(value: &str) -> Result<JobStatus, String> {
    value.parse()
}

fn parse_module(value: &str) -> Result<AnalysisModule, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("analysis_progress={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir.into();
    }
    info!(
        "Configuration loaded from {} (data dir {})",
        cli.config,
        config.storage.data_dir.display()
    );

    let store = Arc::new(DualBackendStore::from_config(&config).await);

    match cli.command {
        Command::History {
            limit,
            status,
            range,
        } => history(&config, store, limit, status, range).await,
        Command::Show { job_id } => show(&config, store, &job_id).await,
        Command::Delete { job_id } => {
            let outcome = store.delete(&job_id).await;
            println!("durable:  {}", outcome.durable);
            println!("expiring: {}", outcome.expiring);
            if !outcome.is_complete() {
                bail!("job {job_id} was only partially deleted");
            }
            Ok(())
        }
        Command::Inspect => {
            let report = store.storage_report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Simulate {
            job_id,
            modules,
            depth,
            provider,
            subject,
            step_delay,
            fail_at,
        } => {
            let params = JobParameters::new(
                modules,
                depth.unwrap_or(config.planner.default_depth),
                provider,
            );
            let job_id = job_id.unwrap_or_else(generate_job_id);
            simulate(&config, store, job_id, params, subject, step_delay, fail_at).await
        }
        Command::Watch { job_id } => {
            let end = watch(&config, store, &job_id).await?;
            println!("polling ended: {end:?}");
            Ok(())
        }
    }
}

async fn history(
    config: &Config,
    store: Arc<DualBackendStore>,
    limit: Option<usize>,
    status: Option<JobStatus>,
    range: HistoryRange,
) -> Result<()> {
    let aggregator = HistoryAggregator::new(store, config.history.clone());
    let mut query = HistoryQuery::new().time_range(range.time_range());
    query.limit = limit;
    query.status = status;

    let summaries = aggregator.list_history(&query).await?;
    for s in &summaries {
        println!(
            "{} {:<40} {:<8} {:>5.1}%  {:<19}  {:>8}  {} ({})",
            s.status_icon,
            s.job_id,
            s.subject,
            s.progress_percentage,
            s.last_update_text,
            s.duration_text,
            s.depth_text,
            s.source
        );
    }

    let stats = HistoryStatistics::from_summaries(&summaries);
    println!(
        "\n{} jobs: {} completed ({:.1}%), {} running, {} failed ({:.1}%)",
        stats.total,
        stats.completed,
        stats.completion_rate,
        stats.running,
        stats.failed,
        stats.failure_rate
    );
    Ok(())
}

async fn show(config: &Config, store: Arc<DualBackendStore>, job_id: &str) -> Result<()> {
    let aggregator = HistoryAggregator::new(store.clone(), config.history.clone());
    let details = aggregator.details(job_id).await?;
    let record = store.get(job_id).await?;

    println!("{}", store.codec().encode(&record)?);
    println!();
    for step in &details.steps {
        println!("  {} {:<22} {}", step.marker.symbol(), step.name, step.description);
    }
    println!(
        "\nelapsed {}, remaining {} (from {} store)",
        format_seconds(record.elapsed_at(now_epoch())),
        details.remaining_text,
        details.summary.source
    );
    Ok(())
}

async fn simulate(
    config: &Config,
    store: Arc<DualBackendStore>,
    job_id: String,
    params: JobParameters,
    subject: String,
    step_delay: Duration,
    fail_at: Option<usize>,
) -> Result<()> {
    let planner = StepPlanner::new(&config.planner);
    let tracker = ProgressTracker::start(job_id.clone(), &params, &planner, store.clone()).await?;
    let record = tracker
        .snapshot()
        .await
        .context("tracker has no record after start")?;
    println!(
        "started {} with {} steps (~{})",
        job_id,
        record.total_steps(),
        format_seconds(record.estimated_total_time)
    );

    let watcher = tokio::spawn(watch_owned(config.clone(), store, job_id.clone()));

    for (index, step) in record.steps.iter().enumerate() {
        if fail_at == Some(index) {
            tracker
                .mark_failed(format!("simulated failure during {}", step.name))
                .await?;
            break;
        }
        tracker
            .advance(step.description.clone(), Some(index))
            .await?;
        tokio::time::sleep(step_delay).await;
    }

    if fail_at.is_none_or(|at| at >= record.total_steps()) {
        tracker
            .mark_completed(
                "Analysis complete",
                json!({
                    "stock_symbol": subject,
                    "modules": params.modules,
                    "decision": {"action": "hold"},
                }),
            )
            .await?;
    }

    match watcher.await? {
        Ok(end) => println!("polling ended: {end:?}"),
        Err(e) => warn!("Watcher failed: {}", e),
    }
    Ok(())
}

async fn watch_owned(config: Config, store: Arc<DualBackendStore>, job_id: String) -> Result<PollEnd> {
    watch(&config, store, &job_id).await
}

async fn watch(config: &Config, store: Arc<DualBackendStore>, job_id: &str) -> Result<PollEnd> {
    let coordinator = Arc::new(PollCoordinator::new(store, config.polling.clone()));
    let session = format!("cli-{}", Uuid::new_v4().simple());
    let scheduler = PollScheduler::new(coordinator, job_id, session).forget_on_exit();
    let token = scheduler.cancellation_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let (mut views, handle) = scheduler.spawn();
    while let Some(view) = views.recv().await {
        println!("{}", view.status_line());
    }
    Ok(handle.await?)
}
