//! Station Alerts - Main Entry Point

use anyhow::Context;
use api::{init_logging, install_metrics, run_server, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_logging(&settings.logging).map_err(|e| anyhow::anyhow!(e))?;

    info!("=== Station Alerts v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        database = %settings.database.url,
        lookback_minutes = settings.alerting.lookback_minutes,
        batch_limit = settings.ingestion.batch_limit,
        "Starting alerting engine..."
    );

    let metrics = match install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed; /metrics disabled");
            None
        }
    };

    run_server(settings, metrics).await
}
