use std::collections::HashMap;
use std::path::PathBuf;

use plugin_registry_common::config::{ConfigLoader, DbConfig};
use plugin_registry_common::tracing::TracingConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryServiceConfig {
    pub tracing: TracingConfig,
    pub environment: String,
    pub http_port: u16,
    /// Base URL under which the service is reachable from the outside. Used
    /// for all generated hypermedia links.
    pub external_base_url: String,
    /// URL path prefix of the JSON api.
    pub api_prefix: String,
    pub cors_origin_regex: String,
    pub db: DbConfig,
    pub discovery: DiscoveryConfig,
    pub recommendations: RecommendationConfig,
    /// Env entries preloaded into the catalog at startup.
    pub current_env: HashMap<String, String>,
    /// Seed URLs preloaded when the seed table is empty.
    pub initial_plugin_seeds: Vec<String>,
    /// Service records upserted at startup.
    pub preconfigured_services: Vec<PreconfiguredService>,
    /// JSON template files (or folders of `*.json` files) loaded at startup.
    pub ui_template_paths: Vec<PathBuf>,
    /// Rewrite rules applied to URLs before a crawler request is made.
    pub url_map_from_localhost: Vec<UrlMapRule>,
    /// Rewrite rules applied to URLs before they are stored in the catalog.
    pub url_map_to_localhost: Vec<UrlMapRule>,
}

impl Default for RegistryServiceConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("plugin-registry-service"),
            environment: "dev".to_string(),
            http_port: 8080,
            external_base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            cors_origin_regex: "https?://localhost(:\\d+)?".to_string(),
            db: DbConfig::default(),
            discovery: DiscoveryConfig::default(),
            recommendations: RecommendationConfig::default(),
            current_env: HashMap::new(),
            initial_plugin_seeds: vec![],
            preconfigured_services: vec![],
            ui_template_paths: vec![],
            url_map_from_localhost: vec![],
            url_map_to_localhost: vec![],
        }
    }
}

impl RegistryServiceConfig {
    /// The external base URL of the api (base URL + api prefix, no trailing
    /// slash).
    pub fn api_base_url(&self) -> String {
        format!(
            "{}{}",
            self.external_base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/')
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between discovery runs. `-1` disables the periodic task
    /// entirely, any other value below 5 is rejected at startup.
    pub interval_seconds: i64,
    /// Number of seeds handled per fan-out batch.
    pub batch_size: usize,
    /// Seconds between purge runs. `-1` disables the periodic task.
    pub purge_interval_seconds: i64,
    pub purge_after: PurgeAfter,
    /// Per request timeout for fetching a plugin self description.
    pub request_timeout_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 15 * 60,
            batch_size: 50,
            purge_interval_seconds: 15 * 60,
            purge_after: PurgeAfter::default(),
            request_timeout_seconds: 5,
        }
    }
}

/// When plugins that were not seen by discovery are removed from the catalog.
///
/// Serialized either as a number of seconds (`-1` meaning never), or as one of
/// the strings `"never"` and `"auto"`. `auto` derives the threshold from the
/// discovery interval (ten missed discovery runs).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PurgeAfter {
    Seconds(i64),
    Keyword(String),
}

impl Default for PurgeAfter {
    fn default() -> Self {
        PurgeAfter::Seconds(7 * 24 * 60 * 60)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Default overall deadline for a recommendation request in seconds.
    pub timeout_seconds: f64,
    /// Default number of recommendations returned.
    pub limit: u64,
    /// Vote multiplier per voter name, defaults to 1 for unlisted voters.
    pub weights: HashMap<String, f64>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5.0,
            limit: 5,
            weights: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreconfiguredService {
    pub service_id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UrlMapRule {
    pub pattern: String,
    pub replacement: String,
}

pub fn make_config_loader() -> ConfigLoader<RegistryServiceConfig> {
    ConfigLoader::new(&PathBuf::from("config/plugin-registry-service.toml"))
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use crate::config::make_config_loader;

    #[test]
    pub fn config_is_loadable() {
        make_config_loader().load().expect("Failed to load config");
    }
}
