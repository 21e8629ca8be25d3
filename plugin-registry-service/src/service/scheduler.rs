use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{PurgeAfter, RegistryServiceConfig};
use crate::service::Services;

/// Shortest interval accepted for the periodic tasks.
const MIN_INTERVAL_SECONDS: i64 = 5;

/// Registers the periodic discovery and purge tasks. Invalid intervals are
/// rejected at startup, `-1` disables a task entirely.
pub fn start_background_tasks(
    services: &Services,
    config: &RegistryServiceConfig,
) -> Result<Vec<JoinHandle<()>>, String> {
    let mut handles = Vec::new();

    let discovery_interval = config.discovery.interval_seconds;
    if discovery_interval != -1 {
        if discovery_interval < MIN_INTERVAL_SECONDS {
            return Err(format!(
                "The shortest allowed interval for the plugin discovery task is \
                 {MIN_INTERVAL_SECONDS} seconds (got {discovery_interval})."
            ));
        }
        let discovery = services.discovery.clone();
        info!("Scheduling plugin discovery every {discovery_interval}s");
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(discovery_interval as u64));
            loop {
                ticker.tick().await;
                discovery.clone().discover_all().await;
            }
        }));
    }

    let purge_interval = config.discovery.purge_interval_seconds;
    let purge_disabled = matches!(&config.discovery.purge_after, PurgeAfter::Seconds(-1))
        || matches!(&config.discovery.purge_after, PurgeAfter::Keyword(keyword) if keyword == "never");
    if purge_interval != -1 && !purge_disabled {
        if purge_interval < MIN_INTERVAL_SECONDS {
            return Err(format!(
                "The shortest allowed interval for the plugin purging task is \
                 {MIN_INTERVAL_SECONDS} seconds (got {purge_interval})."
            ));
        }
        let discovery = services.discovery.clone();
        info!("Scheduling plugin purge every {purge_interval}s");
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(purge_interval as u64));
            loop {
                ticker.tick().await;
                if let Err(err) = discovery.purge().await {
                    error!("Plugin purge failed: {err}");
                }
            }
        }));
    }

    Ok(handles)
}
