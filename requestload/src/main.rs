use metrics_exporter_prometheus::PrometheusBuilder;
use requestload::config::Config;
use requestload::shutdown::install_signal_handler;
use requestload::{LoadDriver, ProcessSpawner, StopReason};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "requestload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    config.validate()?;

    // Prometheus endpoint is opt-in
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("Serving Prometheus metrics on {}", addr);
    }

    let stop = CancellationToken::new();
    install_signal_handler(stop.clone())?;

    let driver = LoadDriver::new(config, ProcessSpawner::new(), stop)?;
    let report = driver.run().await?;

    match report.stop {
        StopReason::PassLimit => info!(
            "Finished {} passes ({} runs, {} unsuccessful)",
            report.passes, report.runs_spawned, report.runs_failed
        ),
        StopReason::Signal => info!(
            "Stopped after {} passes ({} runs, {} unsuccessful)",
            report.passes, report.runs_spawned, report.runs_failed
        ),
    }

    Ok(())
}
