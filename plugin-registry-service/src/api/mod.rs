use std::sync::Arc;

use poem::Route;
use poem_openapi::{OpenApiService, Tags};

use crate::config::RegistryServiceConfig;
use crate::service::Services;

pub mod common;
pub mod env;
pub mod healthcheck;
pub mod hypermedia;
pub mod plugins;
pub mod recommendations;
pub mod root;
pub mod seeds;
pub mod services;
pub mod tabs;
pub mod templates;

use hypermedia::GeneratorRegistry;

#[derive(Tags)]
enum ApiTags {
    Root,
    Plugins,
    Seeds,
    Services,
    Env,
    Templates,
    TemplateTabs,
    Recommendations,
    HealthCheck,
}

pub fn combined_routes(services: &Services, config: &RegistryServiceConfig) -> Route {
    let api_service = make_open_api_service(services, config);

    let ui = api_service.swagger_ui();
    let spec = api_service.spec_endpoint_yaml();

    let api_routes = Route::new()
        .nest("/", api_service)
        .nest("/docs", ui)
        .nest("/specs", spec);

    let prefix = config.api_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        api_routes
    } else {
        Route::new().nest(prefix, api_routes)
    }
}

type ApiServices = (
    root::RootApi,
    plugins::PluginsApi,
    seeds::SeedsApi,
    services::ServicesApi,
    env::EnvApi,
    templates::TemplatesApi,
    tabs::TemplateTabsApi,
    recommendations::RecommendationsApi,
    healthcheck::HealthcheckApi,
);

pub fn make_open_api_service(
    services: &Services,
    config: &RegistryServiceConfig,
) -> OpenApiService<ApiServices, ()> {
    let generators = Arc::new(GeneratorRegistry::new(&config.api_base_url()));
    OpenApiService::new(
        (
            root::RootApi::new(generators.clone()),
            plugins::PluginsApi::new(
                services.plugins.clone(),
                services.discovery.clone(),
                generators.clone(),
            ),
            seeds::SeedsApi::new(services.seed_repo.clone(), generators.clone()),
            services::ServicesApi::new(services.service_repo.clone(), generators.clone()),
            env::EnvApi::new(services.env_repo.clone(), generators.clone()),
            templates::TemplatesApi::new(services.templates.clone(), generators.clone()),
            tabs::TemplateTabsApi::new(services.templates.clone(), generators.clone()),
            recommendations::RecommendationsApi::new(
                services.recommendations.clone(),
                services.plugins.clone(),
                generators.clone(),
            ),
            healthcheck::HealthcheckApi,
        ),
        "Plugin Registry API",
        crate::VERSION,
    )
}
