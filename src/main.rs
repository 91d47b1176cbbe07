use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use smartflow::broker::{Broker, CoinbaseBroker};
use smartflow::config::Settings;
use smartflow::data::MarketDataFeed;
use smartflow::system::TradingSystem;

#[derive(Parser)]
#[command(name = "smartflow", about = "Signal-driven spot trading engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartflow=info".into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    tracing::info!("smartflow starting");
    tracing::info!("  symbols: {:?}", settings.symbols);
    tracing::info!("  total capital: ${:.2}", settings.risk.total_capital);
    tracing::info!("  risk target: {}", settings.risk.risk_target);
    tracing::info!("  max loss: ${:.2}", settings.risk.max_loss);
    tracing::info!("  cycle interval: {}s", settings.cycle_interval_secs);

    let shutdown = CancellationToken::new();

    let broker: Arc<dyn Broker> = Arc::new(CoinbaseBroker::new(&settings.exchange));

    let mut feed = MarketDataFeed::new(
        &settings.exchange.rest_url,
        &settings.data_dir,
        Duration::from_secs(settings.feed_interval_secs),
        shutdown.clone(),
    )?;
    feed.add_subscription(&settings.symbols);

    let system = TradingSystem::new(broker, &settings, shutdown.clone())?;

    let feed_task = tokio::spawn(feed.run());
    let trading_task = tokio::spawn(system.run());

    // OS stop signals flip the cooperative flag; the tasks drain and exit
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_stop_signal().await;
            tracing::info!("stop signal received, shutting down");
            shutdown.cancel();
        })
    };

    let (feed_result, trading_result) = tokio::join!(feed_task, trading_task);
    if let Err(e) = feed_result {
        tracing::error!(error = %e, "market data feed task panicked");
    }
    match trading_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "trading loop exited with error"),
        Err(e) => tracing::error!(error = %e, "trading loop task panicked"),
    }
    signal_task.abort();

    tracing::info!("smartflow stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
