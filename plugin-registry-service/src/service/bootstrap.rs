use tracing::{info, warn};

use crate::config::RegistryServiceConfig;
use crate::repo::RepoError;
use crate::repo::service::ServiceInsert;
use crate::service::{RegistryError, Services};

/// Preloads configured state at startup: env entries, initial seeds (only
/// into an empty seed table), preconfigured services and UI template files.
pub async fn preload(
    services: &Services,
    config: &RegistryServiceConfig,
) -> Result<(), RegistryError> {
    for (name, value) in &config.current_env {
        services.env_repo.upsert(name, value).await?;
    }

    if !config.initial_plugin_seeds.is_empty() && services.seed_repo.list().await?.is_empty() {
        for url in &config.initial_plugin_seeds {
            match services.seed_repo.create(url).await {
                Ok(_) => info!("Registered initial plugin seed '{url}'"),
                Err(RepoError::UniqueViolation(_)) => {}
                Err(err) => warn!("Could not register initial plugin seed '{url}': {err}"),
            }
        }
    }

    for service in &config.preconfigured_services {
        services
            .service_repo
            .upsert(&ServiceInsert {
                service_id: service.service_id.clone(),
                url: service.url.clone(),
                name: service.name.clone(),
                description: service.description.clone(),
            })
            .await?;
    }

    services
        .templates
        .load_ui_templates(&config.ui_template_paths)
        .await;

    Ok(())
}
