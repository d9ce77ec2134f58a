use anyhow::Context;

use ledgerflow_infra::AppConfig;
use ledgerflow_service::{BusBackend, LedgerflowApp};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledgerflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let backend = BusBackend::connect(&config).context("failed to connect event bus")?;
    let app = LedgerflowApp::start(&config, &backend).context("failed to start workers")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    let report = tokio::task::spawn_blocking(move || app.shutdown()).await?;
    backend.shutdown();
    tracing::info!(report = %serde_json::to_string(&report)?, "ledgerflow stopped");
    Ok(())
}
