use std::sync::Arc;

use chrono::Utc;
use plugin_registry_service::config::RegistryServiceConfig;
use plugin_registry_service::model::{DataRelation, MimePattern};
use plugin_registry_service::repo::plugin::{DependencyInsert, IoDataInsert, PluginInsert};
use plugin_registry_service::service::Services;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tempfile::NamedTempFile;

mod api;
mod discovery;
mod pagination;
mod recommendations;
mod repo;
mod tabs;

static MIGRATIONS: Migrator = sqlx::migrate!("./db/migration/sqlite");

pub struct TestEnv {
    pub services: Services,
    pub pool: Arc<Pool<Sqlite>>,
    pub config: RegistryServiceConfig,
    _db_file: NamedTempFile,
}

pub async fn test_env() -> TestEnv {
    test_env_with_config(RegistryServiceConfig::default()).await
}

pub async fn test_env_with_config(config: RegistryServiceConfig) -> TestEnv {
    let db_file = NamedTempFile::new().expect("could not create a temporary database file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("could not open the test database");
    MIGRATIONS
        .run(&pool)
        .await
        .expect("could not run the migrations");
    let pool = Arc::new(pool);
    let services =
        Services::from_sqlite_pool(pool.clone(), &config).expect("could not build the services");
    TestEnv {
        services,
        pool,
        config,
        _db_file: db_file,
    }
}

pub fn plugin_insert(identifier: &str, version: &str, tags: &[&str]) -> PluginInsert {
    PluginInsert {
        identifier: identifier.to_string(),
        version: version.to_string(),
        title: identifier.to_string(),
        description: String::new(),
        plugin_type: "processing".to_string(),
        url: format!("http://plugins.test/{identifier}/{version}/"),
        entry_url: format!("http://plugins.test/{identifier}/{version}/process/"),
        ui_url: format!("http://plugins.test/{identifier}/{version}/ui/"),
        schema: "{\"type\": \"object\"}".to_string(),
        last_available: Utc::now(),
        seed_id: None,
        tags: tags.iter().map(ToString::to_string).collect(),
        data: vec![],
        dependencies: vec![],
    }
}

pub fn consumed_data(data_type: &str, content_types: &[&str], required: bool) -> IoDataInsert {
    IoDataInsert {
        identifier: "input".to_string(),
        required,
        relation: DataRelation::Consumed,
        data_type: MimePattern::parse(data_type),
        content_types: content_types
            .iter()
            .map(|content_type| MimePattern::parse(content_type))
            .collect(),
    }
}

pub fn produced_data(data_type: &str, content_types: &[&str]) -> IoDataInsert {
    IoDataInsert {
        identifier: "output".to_string(),
        required: true,
        relation: DataRelation::Produced,
        data_type: MimePattern::parse(data_type),
        content_types: content_types
            .iter()
            .map(|content_type| MimePattern::parse(content_type))
            .collect(),
    }
}

pub fn dependency_on(identifier: &str, version: Option<&str>) -> DependencyInsert {
    DependencyInsert {
        parameter: "dependency".to_string(),
        required: true,
        identifier: Some(identifier.to_string()),
        version: version.map(ToString::to_string),
        plugin_type: None,
        required_tags: vec![],
        forbidden_tags: vec![],
    }
}
