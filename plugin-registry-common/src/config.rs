use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix for environment variable overrides, e.g.
/// `REGISTRY__HTTP_PORT=8080` or `REGISTRY__DB__SQLITE__DATABASE=./registry.db`.
const ENV_PREFIX: &str = "REGISTRY__";
const ENV_SEPARATOR: &str = "__";

pub trait ConfigLoaderConfig: DeserializeOwned + Serialize + Default + Debug {}

impl<T: DeserializeOwned + Serialize + Default + Debug> ConfigLoaderConfig for T {}

/// Loads a config struct by merging (later sources win): compiled-in
/// defaults, the TOML config file and prefixed environment variables.
pub struct ConfigLoader<T: ConfigLoaderConfig> {
    pub config_file_name: PathBuf,
    config_type: PhantomData<T>,
}

impl<T: ConfigLoaderConfig> ConfigLoader<T> {
    pub fn new(config_file_name: &Path) -> ConfigLoader<T> {
        ConfigLoader {
            config_file_name: config_file_name.to_path_buf(),
            config_type: PhantomData,
        }
    }

    fn figment(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.config_file_name))
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
    }

    pub fn load(&self) -> figment::Result<T> {
        self.figment().extract()
    }

    /// Loads the config, or dumps the default config as TOML and returns
    /// `None` when invoked with `--dump-config`.
    pub fn load_or_dump_config(&self) -> Option<T> {
        if std::env::args().any(|arg| arg == "--dump-config") {
            let default = T::default();
            match toml::to_string_pretty(&default) {
                Ok(dump) => println!("{dump}"),
                Err(err) => eprintln!("Failed to dump default config: {err}"),
            }
            None
        } else {
            match self.load() {
                Ok(config) => Some(config),
                Err(err) => {
                    eprintln!("Failed to load config: {err}");
                    None
                }
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbConfig {
    Postgres(DbPostgresConfig),
    Sqlite(DbSqliteConfig),
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig::Sqlite(DbSqliteConfig::default())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbPostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

impl Default for DbPostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "plugin_registry".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSqliteConfig {
    pub database: String,
    pub max_connections: u32,
}

impl Default for DbSqliteConfig {
    fn default() -> Self {
        Self {
            database: "data/plugin-registry.sqlite".to_string(),
            max_connections: 10,
        }
    }
}
