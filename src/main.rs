use anyhow::Context;
use phyn_gateway::{Config, CycleReport, PhynApi, PhynClient, PollingCoordinator};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Phyn gateway");
    let config = Config::from_env().context("Invalid configuration")?;
    info!("Loaded config: {:?}", config);

    let client = PhynClient::login(
        &config.api_url,
        &config.username,
        &config.password,
        config.brand,
    )
    .await
    .context("Could not log in to Phyn")?;
    let homes = client
        .get_homes(&config.username)
        .await
        .context("Could not list homes")?;

    let mut coordinator = PollingCoordinator::new(Arc::new(client), config.coordinator_options());
    let registered = coordinator.register_homes(&homes);
    if registered == 0 {
        anyhow::bail!("No supported Phyn devices found on this account");
    }
    coordinator
        .setup()
        .await
        .context("Device setup failed")?;

    let coordinator = Arc::new(coordinator);
    {
        let publisher = Arc::downgrade(&coordinator);
        coordinator.subscribe(move |report: &CycleReport| {
            if !report.success {
                return;
            }
            let Some(coordinator) = publisher.upgrade() else {
                return;
            };
            for device in coordinator.devices() {
                match serde_json::to_string(&device.snapshot()) {
                    Ok(readings) => info!(device_id = device.device_id(), "{}", readings),
                    Err(e) => error!("Could not serialize readings: {}", e),
                }
            }
        });
    }

    coordinator
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}
