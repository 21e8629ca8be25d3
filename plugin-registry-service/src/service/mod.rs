use std::sync::Arc;
use std::time::Duration;

use plugin_registry_common::SafeDisplay;
use plugin_registry_common::config::DbConfig;
use plugin_registry_common::db;
use sqlx::{Pool, Postgres, Sqlite};

use crate::config::RegistryServiceConfig;
use crate::model::filter::FilterError;
use crate::repo::RepoError;
use crate::repo::env::{DbEnvRepo, EnvRepo};
use crate::repo::plugin::{DbPluginRepo, PluginRepo};
use crate::repo::seed::{DbSeedRepo, SeedRepo};
use crate::repo::service::{DbServiceRepo, ServiceRepo};
use crate::repo::template::{DbTemplateRepo, TemplateRepo};

pub mod bootstrap;
pub mod discovery;
pub mod filtering;
pub mod plugin;
pub mod recommend;
pub mod scheduler;
pub mod tabs;
pub mod templates;

use discovery::DiscoveryService;
use filtering::FilteringService;
use plugin::PluginService;
use recommend::RecommendationService;
use tabs::TabService;
use templates::TemplateService;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid plugin filter: {0}")]
    InvalidFilter(#[from] FilterError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    InternalRepoError(RepoError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for RegistryError {
    fn from(error: RepoError) -> Self {
        RegistryError::InternalRepoError(error)
    }
}

impl SafeDisplay for RegistryError {
    fn to_safe_string(&self) -> String {
        match self {
            RegistryError::InvalidRequest(_) => self.to_string(),
            RegistryError::InvalidFilter(_) => self.to_string(),
            RegistryError::NotFound(_) => self.to_string(),
            RegistryError::AlreadyExists(_) => self.to_string(),
            RegistryError::InternalRepoError(inner) => inner.to_safe_string(),
            RegistryError::Internal(_) => "Internal error".to_string(),
        }
    }
}

/// Maps unique violations on create operations to an `AlreadyExists` error
/// for the given entity.
pub fn on_conflict(entity: &'static str) -> impl Fn(RepoError) -> RegistryError {
    move |error| match error {
        RepoError::UniqueViolation(_) => RegistryError::AlreadyExists(entity.to_string()),
        other => other.into(),
    }
}

#[derive(Clone)]
pub struct Services {
    pub plugin_repo: Arc<dyn PluginRepo>,
    pub seed_repo: Arc<dyn SeedRepo>,
    pub service_repo: Arc<dyn ServiceRepo>,
    pub env_repo: Arc<dyn EnvRepo>,
    pub template_repo: Arc<dyn TemplateRepo>,
    pub plugins: Arc<PluginService>,
    pub filtering: Arc<FilteringService>,
    pub tabs: Arc<TabService>,
    pub templates: Arc<TemplateService>,
    pub discovery: Arc<DiscoveryService>,
    pub recommendations: Arc<RecommendationService>,
}

impl Services {
    pub async fn new(config: &RegistryServiceConfig) -> Result<Services, String> {
        match config.db.clone() {
            DbConfig::Postgres(db_config) => {
                let pool = db::create_postgres_pool(&db_config)
                    .await
                    .map_err(|err| err.to_string())?;
                Self::from_postgres_pool(Arc::new(pool), config)
            }
            DbConfig::Sqlite(db_config) => {
                let pool = db::create_sqlite_pool(&db_config)
                    .await
                    .map_err(|err| err.to_string())?;
                Self::from_sqlite_pool(Arc::new(pool), config)
            }
        }
    }

    pub fn from_postgres_pool(
        pool: Arc<Pool<Postgres>>,
        config: &RegistryServiceConfig,
    ) -> Result<Services, String> {
        Self::from_repos(
            Arc::new(DbPluginRepo::new(pool.clone())),
            Arc::new(DbSeedRepo::new(pool.clone())),
            Arc::new(DbServiceRepo::new(pool.clone())),
            Arc::new(DbEnvRepo::new(pool.clone())),
            Arc::new(DbTemplateRepo::new(pool)),
            config,
        )
    }

    pub fn from_sqlite_pool(
        pool: Arc<Pool<Sqlite>>,
        config: &RegistryServiceConfig,
    ) -> Result<Services, String> {
        Self::from_repos(
            Arc::new(DbPluginRepo::new(pool.clone())),
            Arc::new(DbSeedRepo::new(pool.clone())),
            Arc::new(DbServiceRepo::new(pool.clone())),
            Arc::new(DbEnvRepo::new(pool.clone())),
            Arc::new(DbTemplateRepo::new(pool)),
            config,
        )
    }

    fn from_repos(
        plugin_repo: Arc<dyn PluginRepo>,
        seed_repo: Arc<dyn SeedRepo>,
        service_repo: Arc<dyn ServiceRepo>,
        env_repo: Arc<dyn EnvRepo>,
        template_repo: Arc<dyn TemplateRepo>,
        config: &RegistryServiceConfig,
    ) -> Result<Services, String> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()
            .map_err(|err| format!("Failed to create the HTTP client: {err}"))?;

        let from_localhost = discovery::compile_url_rules(&config.url_map_from_localhost)?;
        let to_localhost = discovery::compile_url_rules(&config.url_map_to_localhost)?;

        let filtering = Arc::new(FilteringService::new(plugin_repo.clone()));
        let tabs = Arc::new(TabService::new(template_repo.clone(), filtering.clone()));
        let plugins = Arc::new(PluginService::new(plugin_repo.clone()));
        let templates = Arc::new(TemplateService::new(template_repo.clone(), tabs.clone()));
        let discovery = Arc::new(DiscoveryService::new(
            plugin_repo.clone(),
            seed_repo.clone(),
            tabs.clone(),
            plugins.clone(),
            client.clone(),
            config.discovery.clone(),
            from_localhost,
            to_localhost,
        ));
        let recommendations = Arc::new(RecommendationService::new(
            plugin_repo.clone(),
            service_repo.clone(),
            client,
            &config.recommendations,
        ));

        Ok(Services {
            plugin_repo,
            seed_repo,
            service_repo,
            env_repo,
            template_repo,
            plugins,
            filtering,
            tabs,
            templates,
            discovery,
            recommendations,
        })
    }
}
