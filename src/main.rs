use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};

use ble_link_coordinator_lib::config::AppConfig;
use ble_link_coordinator_lib::core::{LinkCoordinator, SimulatedEnumerator};
use ble_link_coordinator_lib::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ble-link.json".to_string());
    let config = AppConfig::load_config(&config_path).await?;
    logging::init_logging(&config.log_level);
    info!("Starting link coordinator with config {}", config_path);

    let enumerator = SimulatedEnumerator::with_command_timeout(
        config.simulation.adapter_count,
        config.simulation.api_version,
        Duration::from_millis(config.command_timeout_ms),
    );
    let coordinator = LinkCoordinator::new(config);

    info!(
        "Controller errors are {:?} for this session",
        coordinator.config().error_policy
    );
    let mut session = coordinator
        .setup(&enumerator)
        .await
        .context("link setup failed")?;

    let outcome = session.wait_for_link(coordinator.link_timeout()).await;
    match &outcome {
        Ok(link) => info!(
            "Central {} and peripheral {} are linked",
            link.central_address, link.peripheral_address
        ),
        Err(e) => error!("Link was not established: {}", e),
    }

    session.shutdown().await.context("shutdown failed")?;
    outcome.context("waiting for link")?;
    Ok(())
}
