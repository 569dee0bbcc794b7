//! SAFER Ingest - carrier snapshot harvester

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use safer_common::logging::{init_logging, LogConfig, LogLevel};
use safer_ingest::{
    catalog,
    config::IngestConfig,
    fetch::RegistryClient,
    parser::CarrierSnapshotParser,
    pipeline::{Pipeline, RunReport},
    storage::{PgCarrierStore, RecordStore},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "safer-ingest")]
#[command(author, version, about = "Harvest FMCSA SAFER carrier snapshots into PostgreSQL")]
struct Cli {
    /// Constrained profile: 10 workers, no proxy, capped todo list
    #[arg(short, long)]
    test: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// CSV file with USDOT numbers (overrides INPUT_FILE)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Process at most this many pending USDOT numbers
    #[arg(long)]
    limit: Option<usize>,

    /// Number of fetch workers (overrides CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Apply database migrations before running
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("safer-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info,html5ever=warn,selectors=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _logging = init_logging(&log_config)?;

    let config = load_config(&cli)?;

    info!(
        mode = if config.test_mode { "test" } else { "production" },
        workers = config.workers(),
        batch_size = config.batch_size,
        max_attempts = config.max_retries,
        timeout_secs = config.request_timeout_secs,
        proxy = config.active_proxy().is_some(),
        input = %config.input_file.display(),
        "Starting SAFER ingest"
    );

    if cli.migrate {
        let mut store = PgCarrierStore::connect(&config.database_url)
            .await
            .context("Failed to connect to database for migrations")?;
        store.migrate().await.context("Failed to run migrations")?;
        if let Err(e) = store.close().await {
            warn!(error = %e, "Failed to close migration connection");
        }
    }

    let universe = catalog::load_identifiers(&config.input_file, &config.input_column)
        .with_context(|| format!("Failed to load {}", config.input_file.display()))?;

    let plan = catalog::resolve_todo(
        universe,
        PgCarrierStore::connect(&config.database_url).await,
        config.todo_limit(),
    )
    .await;

    if plan.todo.is_empty() {
        info!("No records to scrape");
        return Ok(());
    }

    let registry = RegistryClient::new(config.fetch_settings(), config.active_proxy())?;
    let store = PgCarrierStore::connect(&config.database_url)
        .await
        .context("Failed to open writer connection")?;

    let interrupt = CancellationToken::new();
    tokio::spawn(shutdown_signal(interrupt.clone()));

    let pipeline = Pipeline::new(
        config.pipeline_settings(),
        registry,
        CarrierSnapshotParser::new(),
        store,
    )
    .with_interrupt(interrupt);

    let report = pipeline.run(plan.todo).await?;
    print_summary(&report, config.test_mode);

    Ok(())
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;

    if cli.test {
        config.test_mode = true;
    }
    if let Some(input) = &cli.input {
        config.input_file = input.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config.limit = cli.limit.or(config.limit);

    config.validate()?;
    Ok(config)
}

/// Cancel `interrupt` on Ctrl+C or SIGTERM
async fn shutdown_signal(interrupt: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, finishing jobs already queued");
        },
        _ = terminate => {
            warn!("Received terminate signal, finishing jobs already queued");
        },
    }

    interrupt.cancel();
}

fn print_summary(report: &RunReport, test_mode: bool) {
    let stats = &report.stats;

    info!(
        scraped = stats.scraped,
        failed = stats.failed,
        saved = stats.saved,
        errors = stats.errors,
        elapsed_secs = report.elapsed.as_secs_f64(),
        per_sec = report.throughput(),
        "Run complete"
    );

    if report.interrupted {
        warn!(
            not_enqueued = report.not_enqueued,
            "Run was interrupted; remaining USDOT numbers stay pending for the next run"
        );
    }

    println!();
    println!("==================== SAFER ingest summary ====================");
    println!("  Mode:        {}", if test_mode { "test" } else { "production" });
    println!("  Scraped:     {}", stats.scraped);
    println!("  Failed:      {}", stats.failed);
    println!("  Saved:       {}", stats.saved);
    println!("  Errors:      {}", stats.errors);
    println!("  Elapsed:     {:.1}s", report.elapsed.as_secs_f64());
    println!("  Throughput:  {:.2}/s", report.throughput());
    if report.interrupted {
        println!("  Not queued:  {}", report.not_enqueued);
    }
    println!("==============================================================");
}
