use plugin_registry_common::config::DbConfig;
use plugin_registry_common::db;
use plugin_registry_common::tracing::init_tracing_with_default_env_filter;
use plugin_registry_service::config::{RegistryServiceConfig, make_config_loader};
use plugin_registry_service::service::{Services, bootstrap, scheduler};
use plugin_registry_service::{api, metrics};
use poem::EndpointExt;
use poem::endpoint::PrometheusExporter;
use poem::listener::TcpListener;
use poem::middleware::Cors;
use prometheus::Registry;
use sqlx::migrate::Migrator;
use tracing::{error, info};

static SQLITE_MIGRATIONS: Migrator = sqlx::migrate!("./db/migration/sqlite");
static POSTGRES_MIGRATIONS: Migrator = sqlx::migrate!("./db/migration/postgres");

fn main() -> Result<(), std::io::Error> {
    if std::env::args().any(|arg| arg == "--dump-openapi-yaml") {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(dump_openapi_yaml())
    } else if let Some(config) = make_config_loader().load_or_dump_config() {
        init_tracing_with_default_env_filter(&config.tracing);
        let prometheus = metrics::register_all();

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async_main(&config, prometheus))
    } else {
        Ok(())
    }
}

async fn dump_openapi_yaml() -> Result<(), std::io::Error> {
    let config = RegistryServiceConfig::default();
    let services = Services::new(&config).await.map_err(|e| {
        error!("Services - init error: {}", e);
        std::io::Error::other(e)
    })?;
    let open_api_service = api::make_open_api_service(&services, &config);
    println!("{}", open_api_service.spec_yaml());
    Ok(())
}

async fn async_main(
    config: &RegistryServiceConfig,
    prometheus_registry: Registry,
) -> Result<(), std::io::Error> {
    let http_port = config.http_port;

    info!("Starting plugin registry server on port: http: {http_port}");

    match config.db.clone() {
        DbConfig::Postgres(db_config) => {
            db::postgres_migrate(&db_config, &POSTGRES_MIGRATIONS)
                .await
                .map_err(|e| {
                    error!("DB - init error: {}", e);
                    std::io::Error::other(format!("Init error: {e:?}"))
                })?;
        }
        DbConfig::Sqlite(db_config) => {
            db::sqlite_migrate(&db_config, &SQLITE_MIGRATIONS)
                .await
                .map_err(|e| {
                    error!("DB - init error: {}", e);
                    std::io::Error::other(format!("Init error: {e:?}"))
                })?;
        }
    };

    let services = Services::new(config).await.map_err(|e| {
        error!("Services - init error: {}", e);
        std::io::Error::other(e)
    })?;

    bootstrap::preload(&services, config).await.map_err(|e| {
        error!("Bootstrap - preload error: {}", e);
        std::io::Error::other(format!("Preload error: {e}"))
    })?;

    let _background_tasks = scheduler::start_background_tasks(&services, config).map_err(|e| {
        error!("Scheduler - init error: {}", e);
        std::io::Error::other(e)
    })?;

    let cors = Cors::new().allow_origin_regex(&config.cors_origin_regex);

    let app = api::combined_routes(&services, config)
        .nest("/metrics", PrometheusExporter::new(prometheus_registry))
        .with(cors);

    poem::Server::new(TcpListener::bind(format!("0.0.0.0:{http_port}")))
        .run(app)
        .await
}
