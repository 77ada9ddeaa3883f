use amazon_price_watcher::config::WatcherConfig;
use amazon_price_watcher::extractor::ProductExtractor;
use amazon_price_watcher::history::CsvHistory;
use amazon_price_watcher::notifier::{HttpGateway, Notifier};
use amazon_price_watcher::pipeline::{PriceWatchPipeline, RunOutcome};

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = WatcherConfig::from_env().context("loading watcher configuration")?;
    info!("starting price watch run");

    let extractor = ProductExtractor::new(config.target.clone());
    let store = CsvHistory::new(&config.history_path);
    let gateway = HttpGateway::new(&config.gateway_url).context("configuring message gateway")?;
    let notifier = Notifier::new(
        gateway,
        config.recipient.clone(),
        Duration::from_secs(config.settle_seconds),
    );

    let mut pipeline = PriceWatchPipeline::new(extractor, store, notifier);
    let outcome = pipeline.run();
    info!(?outcome, "price watch run finished");

    // Failures inside the run are visible in the log only, matching the
    // fire-and-forget scheduling model. strict_exit opts into a hard exit.
    if config.strict_exit {
        if let RunOutcome::Aborted { stage } = outcome {
            anyhow::bail!("run aborted during {stage:?}");
        }
    }
    Ok(())
}
