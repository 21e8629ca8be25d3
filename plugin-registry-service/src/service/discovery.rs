use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

use crate::config::{DiscoveryConfig, PurgeAfter, UrlMapRule};
use crate::metrics;
use crate::model::{
    DataRelation, MimePattern, PLUGIN_SIGNATURE_KEYS, PluginDescription, RunnerPluginList,
};
use crate::repo::RepoError;
use crate::repo::plugin::{DependencyInsert, IoDataInsert, PluginInsert, PluginRepo};
use crate::repo::seed::SeedRepo;
use crate::service::RegistryError;
use crate::service::plugin::PluginService;
use crate::service::tabs::TabService;

/// Maximum nesting depth for runner indirections, guards against crawl
/// cycles.
const MAX_NESTING: u32 = 3;

/// Delay between fan-out batches so many seeds do not hit the network at
/// once.
const BATCH_STAGGER: Duration = Duration::from_millis(250);

const RUNNER_LISTING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct UrlRewrite {
    pattern: Regex,
    replacement: String,
}

/// Compiles configured rewrite rules, rejecting invalid patterns at startup.
pub fn compile_url_rules(rules: &[UrlMapRule]) -> Result<Vec<UrlRewrite>, String> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|pattern| UrlRewrite {
                    pattern,
                    replacement: rule.replacement.clone(),
                })
                .map_err(|err| format!("Invalid URL rewrite pattern '{}': {err}", rule.pattern))
        })
        .collect()
}

pub fn apply_url_rules(url: &str, rules: &[UrlRewrite]) -> String {
    let mut url = url.to_string();
    for rule in rules {
        url = rule
            .pattern
            .replace_all(&url, rule.replacement.as_str())
            .into_owned();
    }
    url
}

/// Periodic BFS crawl over the seed URLs: ingests plugin self descriptions,
/// follows plugin runner listings and ages out absent plugins.
pub struct DiscoveryService {
    plugin_repo: Arc<dyn PluginRepo>,
    seed_repo: Arc<dyn SeedRepo>,
    tabs: Arc<TabService>,
    plugins: Arc<PluginService>,
    client: reqwest::Client,
    config: DiscoveryConfig,
    from_localhost: Vec<UrlRewrite>,
    to_localhost: Vec<UrlRewrite>,
}

impl DiscoveryService {
    #[allow(clippy::too_many_arguments, reason = "startup wiring")]
    pub fn new(
        plugin_repo: Arc<dyn PluginRepo>,
        seed_repo: Arc<dyn SeedRepo>,
        tabs: Arc<TabService>,
        plugins: Arc<PluginService>,
        client: reqwest::Client,
        config: DiscoveryConfig,
        from_localhost: Vec<UrlRewrite>,
        to_localhost: Vec<UrlRewrite>,
    ) -> Self {
        Self {
            plugin_repo,
            seed_repo,
            tabs,
            plugins,
            client,
            config,
            from_localhost,
            to_localhost,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_seconds.max(1))
    }

    /// One discovery tick: crawl every registered seed, fanned out in
    /// staggered batches.
    pub async fn discover_all(self: Arc<Self>) {
        let seeds = match self.seed_repo.list().await {
            Ok(seeds) => seeds,
            Err(err) => {
                error!("Could not load seeds for discovery: {err}");
                return;
            }
        };
        let urls: Vec<String> = seeds.into_iter().map(|seed| seed.url).collect();
        self.discover_batched(urls, None, 0, false).await;
    }

    async fn discover_batched(
        self: Arc<Self>,
        urls: Vec<String>,
        root_seed: Option<String>,
        nesting: u32,
        delete_on_missing: bool,
    ) {
        let batch_size = self.config.batch_size.max(1);
        let mut join_set = JoinSet::new();
        for (batch_index, batch) in urls.chunks(batch_size).enumerate() {
            for url in batch {
                let this = self.clone();
                let url = url.clone();
                let root_seed = root_seed.clone();
                let stagger = BATCH_STAGGER * batch_index as u32;
                join_set.spawn(async move {
                    tokio::time::sleep(stagger).await;
                    this.discover(url, root_seed, nesting, delete_on_missing)
                        .await;
                });
            }
        }
        while join_set.join_next().await.is_some() {}
    }

    /// Discovers plugins starting off at a single URL. The URL either hosts a
    /// plugin self description or a plugin runner listing more plugins.
    pub fn discover(
        self: Arc<Self>,
        url: String,
        root_seed: Option<String>,
        nesting: u32,
        delete_on_missing: bool,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.discover_inner(url, root_seed, nesting, delete_on_missing)
                .await;
        })
    }

    async fn discover_inner(
        self: Arc<Self>,
        url: String,
        root_seed: Option<String>,
        nesting: u32,
        delete_on_missing: bool,
    ) {
        if nesting > MAX_NESTING {
            error!("Plugin discovery nested too deep, aborting! (url={url}, root_seed={root_seed:?}, nesting={nesting})");
            return;
        }
        let now = Utc::now();
        let request_url = apply_url_rules(&url, &self.from_localhost);

        let response = match self
            .client
            .get(&request_url)
            .timeout(self.request_timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_connect() => {
                metrics::DISCOVERY_ERRORS_TOTAL.inc();
                if delete_on_missing {
                    info!("Can't reach '{url}', trying to delete it");
                    self.delete_plugin_by_url(&url).await;
                }
                return;
            }
            Err(err) => {
                metrics::DISCOVERY_ERRORS_TOTAL.inc();
                info!("Could not reach seed/plugin '{url}' because of a network error. ({err})");
                return;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            if delete_on_missing {
                info!("Plugin/seed '{url}' not found, trying to delete it");
                self.delete_plugin_by_url(&url).await;
            }
            return;
        }
        if !response.status().is_success() {
            metrics::DISCOVERY_ERRORS_TOTAL.inc();
            info!(
                "Could not reach seed/plugin '{url}' because of a server error. (status {})",
                response.status()
            );
            return;
        }

        let Ok(data) = response.json::<serde_json::Value>().await else {
            // not JSON, not a plugin
            return;
        };

        if is_plugin_resource(&data) {
            let description: PluginDescription = match serde_json::from_value(data) {
                Ok(description) => description,
                Err(err) => {
                    warn!("Ignoring malformed plugin resource at '{url}': {err}");
                    return;
                }
            };
            let stored_url = apply_url_rules(&url, &self.to_localhost);
            let stored_root_seed = root_seed
                .as_deref()
                .map(|seed| apply_url_rules(seed, &self.to_localhost));
            match self
                .ingest_plugin(description, &stored_url, stored_root_seed.as_deref(), now)
                .await
            {
                Ok((plugin_id, true)) => {
                    metrics::DISCOVERED_PLUGINS_TOTAL.inc();
                    if let Err(err) = self.tabs.update_plugin_lists(plugin_id).await {
                        error!("Could not update tab memberships for plugin {plugin_id}: {err}");
                    }
                    if let Err(err) = self.plugins.resolve_all_dependencies().await {
                        error!("Could not resolve dependencies after ingesting plugin {plugin_id}: {err}");
                    }
                }
                Ok((_, false)) => {}
                Err(err) => error!("Could not ingest plugin from '{url}': {err}"),
            }
            return;
        }

        // treat the URL as a plugin runner
        let listing_url = format!("{}/plugins", request_url.trim_end_matches('/'));
        let listing = match self
            .client
            .get(&listing_url)
            .timeout(RUNNER_LISTING_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => match response.json::<RunnerPluginList>().await {
                Ok(listing) => listing,
                Err(_) => return,
            },
            Err(_) => return,
        };

        let root_seed = root_seed.unwrap_or_else(|| url.clone());
        let children: Vec<String> = listing
            .plugins
            .into_iter()
            .filter_map(|plugin| plugin.api_root)
            .collect();
        self.clone()
            .discover_batched(children, Some(root_seed), nesting + 1, false)
            .await;
    }

    async fn ingest_plugin(
        &self,
        description: PluginDescription,
        url: &str,
        root_seed: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<(i64, bool), RegistryError> {
        if let Some(existing) = self
            .plugin_repo
            .get_by_identifier_and_version(&description.name, &description.version)
            .await?
        {
            self.plugin_repo.touch(existing.id, now).await?;
            return Ok((existing.id, false));
        }

        let seed_id = match root_seed {
            Some(seed_url) => self
                .seed_repo
                .get_by_url(seed_url)
                .await?
                .map(|seed| seed.id),
            None => self
                .seed_repo
                .get_by_url(url)
                .await?
                .map(|seed| seed.id),
        };

        let insert = plugin_insert_from_description(description, url, seed_id, now);
        match self.plugin_repo.create(&insert).await {
            Ok(plugin_id) => Ok((plugin_id, true)),
            Err(RepoError::UniqueViolation(_)) => {
                // a concurrent discovery task won the race, just refresh
                let existing = self
                    .plugin_repo
                    .get_by_identifier_and_version(&insert.identifier, &insert.version)
                    .await?
                    .ok_or_else(|| {
                        RegistryError::Internal(format!(
                            "Plugin {}@{} vanished during ingest",
                            insert.identifier, insert.version
                        ))
                    })?;
                self.plugin_repo.touch(existing.id, now).await?;
                Ok((existing.id, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_plugin_by_url(&self, url: &str) {
        let stored_url = apply_url_rules(url, &self.to_localhost);
        if let Err(err) = self.plugin_repo.delete_by_url(&stored_url).await {
            error!("Could not delete plugin with url '{stored_url}': {err}");
        }
    }

    /// Triggers discovery for a URL that must be reachable from a registered
    /// seed (same authority, path prefix; the shortest matching seed wins).
    /// Plugins that turn out to be missing are deleted.
    pub async fn discover_known_url(self: Arc<Self>, url: &str) -> Result<(), RegistryError> {
        let parsed = Url::parse(url)
            .map_err(|_| RegistryError::InvalidRequest(format!("Invalid url '{url}'")))?;
        let mut matching: Vec<_> = self
            .seed_repo
            .list()
            .await?
            .into_iter()
            .filter(|seed| {
                Url::parse(&seed.url).is_ok_and(|seed_url| {
                    seed_url.host_str() == parsed.host_str()
                        && seed_url.port_or_known_default() == parsed.port_or_known_default()
                        && parsed.path().starts_with(seed_url.path())
                })
            })
            .collect();
        matching.sort_by_key(|seed| (seed.url.len(), seed.url.clone()));
        if let Some(seed) = matching.first() {
            tokio::spawn(self.clone().discover(
                url.to_string(),
                Some(seed.url.clone()),
                0,
                true,
            ));
        }
        Ok(())
    }

    /// Removes plugins that were not seen by discovery for longer than the
    /// configured threshold. The anchor is the most recent `last_available`
    /// in the catalog, so purging only progresses while discovery refreshes
    /// timestamps.
    pub async fn purge(&self) -> Result<u64, RegistryError> {
        let purge_after_seconds = match &self.config.purge_after {
            PurgeAfter::Seconds(-1) => return Ok(0),
            PurgeAfter::Seconds(seconds) if *seconds < 1 => {
                warn!(
                    "The purge_after configuration is invalid ({seconds}), not purging plugins"
                );
                return Ok(0);
            }
            PurgeAfter::Seconds(seconds) => *seconds,
            PurgeAfter::Keyword(keyword) if keyword == "never" => return Ok(0),
            PurgeAfter::Keyword(keyword) if keyword == "auto" => {
                let interval = self.config.interval_seconds;
                if interval < 5 {
                    warn!(
                        "The purge_after configuration could not be inferred automatically \
                         (too small discovery interval {interval}). Aborting."
                    );
                    return Ok(0);
                }
                // allow up to ten missed discovery runs before purging
                interval * 10
            }
            PurgeAfter::Keyword(keyword) => {
                warn!("Unknown purge_after configuration '{keyword}'. Aborting.");
                return Ok(0);
            }
        };

        let Some(latest) = self.plugin_repo.max_last_available().await? else {
            info!("No plugins detected. No plugins to purge.");
            return Ok(0);
        };
        let cutoff = latest - chrono::Duration::seconds(purge_after_seconds);
        let purged = self.plugin_repo.purge_unavailable_before(cutoff).await?;
        if purged > 0 {
            metrics::PURGED_PLUGINS_TOTAL.inc_by(purged);
            info!("Purged {purged} plugins that were last available before {cutoff}");
        }
        Ok(purged)
    }
}

fn is_plugin_resource(data: &serde_json::Value) -> bool {
    data.as_object()
        .is_some_and(|object| PLUGIN_SIGNATURE_KEYS.iter().all(|key| object.contains_key(*key)))
}

fn resolve_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

fn plugin_insert_from_description(
    description: PluginDescription,
    url: &str,
    seed_id: Option<i64>,
    now: chrono::DateTime<Utc>,
) -> PluginInsert {
    let entry_point = description.entry_point;
    let mut data: Vec<IoDataInsert> = entry_point
        .data_input
        .into_iter()
        .map(|input| IoDataInsert {
            identifier: input.parameter,
            required: input.required,
            relation: DataRelation::Consumed,
            data_type: MimePattern::parse(&input.data_type),
            content_types: input
                .content_type
                .iter()
                .map(|content_type| MimePattern::parse(content_type))
                .collect(),
        })
        .collect();
    data.extend(entry_point.data_output.into_iter().map(|output| IoDataInsert {
        identifier: output.name,
        required: output.required,
        relation: DataRelation::Produced,
        data_type: MimePattern::parse(&output.data_type),
        content_types: output
            .content_type
            .iter()
            .map(|content_type| MimePattern::parse(content_type))
            .collect(),
    }));

    let dependencies = entry_point
        .plugin_dependencies
        .into_iter()
        .map(|dependency| {
            let (forbidden, required): (Vec<&String>, Vec<&String>) = dependency
                .tags
                .iter()
                .partition(|tag| tag.starts_with('!'));
            DependencyInsert {
                parameter: dependency.parameter,
                required: dependency.required,
                identifier: dependency.name,
                version: dependency.version,
                plugin_type: dependency.plugin_type,
                required_tags: required.into_iter().cloned().collect(),
                forbidden_tags: forbidden
                    .into_iter()
                    .map(|tag| tag.trim_start_matches('!').to_string())
                    .collect(),
            }
        })
        .collect();

    let title = match description.title {
        Some(title) if !title.is_empty() => title,
        // do not error for misbehaving plugins without a title
        _ => description.name.clone(),
    };

    PluginInsert {
        identifier: description.name,
        version: description.version,
        title,
        description: description.description,
        plugin_type: description.plugin_type,
        url: url.to_string(),
        entry_url: resolve_url(url, &entry_point.href),
        ui_url: resolve_url(url, &entry_point.ui_href),
        schema: "{\"type\": \"object\"}".to_string(),
        last_available: now,
        seed_id,
        tags: description.tags,
        data,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn url_rules_apply_in_order() {
        let rules = compile_url_rules(&[
            UrlMapRule {
                pattern: "localhost".to_string(),
                replacement: "plugin-host".to_string(),
            },
            UrlMapRule {
                pattern: ":8080".to_string(),
                replacement: ":9090".to_string(),
            },
        ])
        .unwrap();
        assert_eq!(
            apply_url_rules("http://localhost:8080/plugin/", &rules),
            "http://plugin-host:9090/plugin/"
        );
    }

    #[test]
    fn invalid_url_rules_are_rejected() {
        let result = compile_url_rules(&[UrlMapRule {
            pattern: "(".to_string(),
            replacement: "x".to_string(),
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn plugin_resources_are_detected_by_their_keys() {
        let plugin = serde_json::json!({
            "name": "p", "version": "1", "title": "P", "description": "",
            "type": "processing", "tags": [], "entryPoint": {}
        });
        assert!(is_plugin_resource(&plugin));
        let runner = serde_json::json!({"plugins": []});
        assert!(!is_plugin_resource(&runner));
    }

    #[test]
    fn entry_urls_resolve_against_the_plugin_root() {
        assert_eq!(
            resolve_url("http://host:1234/plugins/demo/", "./process/"),
            "http://host:1234/plugins/demo/process/"
        );
        assert_eq!(
            resolve_url("http://host:1234/plugins/demo/", "http://other/ui/"),
            "http://other/ui/"
        );
    }
}
