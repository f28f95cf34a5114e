use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use doc_stress::configuration::Configuration;
use doc_stress::memory::InMemoryStore;
use doc_stress::run::RunController;
use doc_stress::runner::WorkloadRunnerFactory;
use doc_stress::settings::{Settings, MEMORY_SCHEME};
use doc_stress::stats::{ShardedStats, Stats};
use doc_stress::store::DataStore;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::from_env().context("Invalid settings")?);
    settings.print_settings();

    let stats = Arc::new(ShardedStats::new());
    let run_config = prepare(Arc::clone(&settings), Arc::clone(&stats))
        .context("Failed to prepare the workload")?;

    let mut combined_stats = Stats::new();
    let start_time = Instant::now();

    let (ctrl, run_finished) = doc_stress::run::run(run_config);
    let ctrl = Arc::new(ctrl);

    // The leaking task won't prevent the runtime from being stopped.
    tokio::task::spawn(stop_on_signal(Arc::clone(&ctrl)));

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    futures::pin_mut!(run_finished);

    // Skip the first tick, which is immediate
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let partial_stats = stats.get_combined_and_clear();
                tracing::info!(
                    operations = partial_stats.total_operations(),
                    errors = partial_stats.total_errors(),
                    elapsed = ?start_time.elapsed(),
                    "progress",
                );
                combined_stats.combine(&partial_stats);
            }
            result = &mut run_finished => {
                combined_stats.combine(&stats.get_combined_and_clear());
                combined_stats.log_summary(start_time.elapsed());
                return result.context("An error occurred during the workload");
            }
        }
    }
}

async fn stop_on_signal(runner: Arc<RunController>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C");
        return;
    }
    tracing::info!("stopping, press Ctrl-C again to abort");
    runner.ask_to_stop();

    if tokio::signal::ctrl_c().await.is_ok() {
        runner.abort();
    }
}

fn prepare(settings: Arc<Settings>, stats: Arc<ShardedStats>) -> Result<Configuration> {
    let store = connect(&settings)?;

    let operation_factory =
        WorkloadRunnerFactory::new(Arc::clone(&settings), store, stats)?;

    Ok(Configuration {
        max_duration: settings.max_duration,
        concurrency: settings.workers,
        rate_limit_per_second: settings.rate_limit_per_second,
        operation_factory: Arc::new(operation_factory),
    })
}

fn connect(settings: &Settings) -> Result<Arc<dyn DataStore>> {
    match settings.store_scheme()? {
        MEMORY_SCHEME => {
            tracing::info!(
                max_documents = settings.memory_max_documents,
                "using the in-memory document store",
            );
            Ok(Arc::new(InMemoryStore::with_max_documents(
                settings.memory_max_documents,
            )))
        }
        scheme => bail!("No driver for the {:?} scheme is built in", scheme),
    }
}
