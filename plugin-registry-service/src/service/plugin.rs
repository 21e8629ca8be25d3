use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::model::version::{is_single_version, parse_version_lenient, parse_version_req};
use crate::model::{MimePattern, Plugin};
use crate::repo::pagination::{PageRequest, PaginationInfo};
use crate::repo::plugin::{DependencyDetails, PluginCriteria, PluginRepo};
use crate::service::RegistryError;

/// Raw catalog query arguments as they arrive from the API.
#[derive(Debug, Clone, Default)]
pub struct PluginQuery {
    /// A single database id or a comma separated list of ids.
    pub plugin_id: Option<String>,
    /// The plugin identifier (not the human readable title).
    pub identifier: Option<String>,
    /// A single version or a version requirement (the latter needs
    /// `identifier`).
    pub version: Option<String>,
    pub url: Option<String>,
    pub plugin_type: Option<String>,
    /// Comma separated tag list, `!` prefixed entries are forbidden tags.
    pub tags: Option<String>,
    pub input_data_type: Option<String>,
    pub input_content_type: Option<String>,
    pub last_available_period: Option<i64>,
    pub template_tab: Option<i64>,
}

pub struct PluginService {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl PluginService {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }

    pub async fn resolve_criteria(
        &self,
        query: &PluginQuery,
    ) -> Result<PluginCriteria, RegistryError> {
        let mut criteria = PluginCriteria::default();

        if let Some(raw_ids) = &query.plugin_id {
            let ids = raw_ids
                .split(',')
                .map(|id| id.trim().parse::<i64>())
                .collect::<Result<Vec<i64>, _>>()
                .map_err(|_| {
                    RegistryError::InvalidRequest(
                        "The plugin-id must be a comma separated list of valid plugin ids!"
                            .to_string(),
                    )
                })?;
            criteria.ids = Some(ids);
        }

        if let Some(period) = query.last_available_period {
            if period > 0 {
                criteria.available_after = Some(Utc::now() - Duration::seconds(period));
            }
        }

        criteria.identifier = query.identifier.clone();
        if let Some(version) = &query.version {
            if is_single_version(version) {
                criteria.versions = Some(vec![version.clone()]);
            } else {
                let Some(identifier) = &query.identifier else {
                    return Err(RegistryError::InvalidRequest(
                        "The name filter must be set if the version filter is a specifier \
                         matching potentially multiple versions!"
                            .to_string(),
                    ));
                };
                let requirement = parse_version_req(version).map_err(|_| {
                    RegistryError::InvalidRequest(format!("Invalid version specifier '{version}'"))
                })?;
                let known_versions = self.plugin_repo.versions_of(identifier).await?;
                criteria.versions = Some(
                    known_versions
                        .into_iter()
                        .filter(|known| {
                            parse_version_lenient(known)
                                .map(|parsed| requirement.matches(&parsed))
                                .unwrap_or(false)
                        })
                        .collect(),
                );
            }
        }

        criteria.url = query.url.clone();
        criteria.plugin_type = query.plugin_type.clone();

        if let Some(tags) = &query.tags {
            let tag_list: Vec<&str> = tags
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .collect();
            let must_have: Vec<String> = tag_list
                .iter()
                .filter(|tag| !tag.starts_with('!'))
                .map(ToString::to_string)
                .collect();
            let forbidden: Vec<String> = tag_list
                .iter()
                .filter(|tag| tag.starts_with('!'))
                .map(|tag| tag.trim_start_matches('!').to_string())
                .collect();
            let mut all_names = must_have.clone();
            all_names.extend(forbidden.iter().cloned());
            let known = self.plugin_repo.tag_ids(&all_names).await?;
            if must_have.iter().any(|name| !known.contains_key(name)) {
                // a required tag that does not exist cannot match any plugin
                criteria.impossible = true;
            }
            criteria.must_have_tag_ids = must_have
                .iter()
                .filter_map(|name| known.get(name).copied())
                .collect();
            criteria.forbidden_tag_ids = forbidden
                .iter()
                .filter_map(|name| known.get(name).copied())
                .collect();
        }

        if let Some(data_type) = &query.input_data_type {
            criteria.input_data_type = Some(MimePattern::parse(data_type));
        }
        if let Some(content_type) = &query.input_content_type {
            criteria.input_content_type = Some(MimePattern::parse(content_type));
        }
        criteria.template_tab = query.template_tab;

        Ok(criteria)
    }

    pub async fn list(
        &self,
        query: &PluginQuery,
        page: &PageRequest,
    ) -> Result<(PaginationInfo, Vec<Plugin>), RegistryError> {
        let criteria = self.resolve_criteria(query).await?;
        let (info, records) = self.plugin_repo.find_page(&criteria, page).await?;
        let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
        let mut details = self.plugin_repo.details_many(&ids).await?;
        let plugins = records
            .into_iter()
            .map(|record| {
                let details = details.remove(&record.id).unwrap_or_default();
                record.into_model(details)
            })
            .collect();
        Ok((info, plugins))
    }

    pub async fn get(&self, id: i64) -> Result<Plugin, RegistryError> {
        let record = self
            .plugin_repo
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Plugin {id}")))?;
        let mut details = self.plugin_repo.details_many(&[id]).await?;
        Ok(record.into_model(details.remove(&id).unwrap_or_default()))
    }

    /// Loads full plugin models preserving the order of the given ids.
    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<Plugin>, RegistryError> {
        let records = self.plugin_repo.get_many(ids).await?;
        let mut details = self.plugin_repo.details_many(ids).await?;
        let mut by_id: std::collections::HashMap<i64, Plugin> = records
            .into_iter()
            .map(|record| {
                let details = details.remove(&record.id).unwrap_or_default();
                (record.id, record.into_model(details))
            })
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn delete(&self, id: i64) -> Result<(), RegistryError> {
        if !self.plugin_repo.delete(id).await? {
            return Err(RegistryError::NotFound(format!("Plugin {id}")));
        }
        Ok(())
    }

    /// Recomputes the best match of every stored dependency. Run after each
    /// ingest so new plugins can win existing dependency slots.
    pub async fn resolve_all_dependencies(&self) -> Result<(), RegistryError> {
        for dependency in self.plugin_repo.all_dependencies().await? {
            let best_match = self.resolve_dependency(&dependency).await?;
            self.plugin_repo
                .set_best_match(dependency.record.id, best_match)
                .await?;
        }
        Ok(())
    }

    pub async fn resolve_dependencies_of(&self, plugin_id: i64) -> Result<(), RegistryError> {
        let mut details = self.plugin_repo.details_many(&[plugin_id]).await?;
        for dependency in details.remove(&plugin_id).unwrap_or_default().dependencies {
            let best_match = self.resolve_dependency(&dependency).await?;
            self.plugin_repo
                .set_best_match(dependency.record.id, best_match)
                .await?;
        }
        Ok(())
    }

    async fn resolve_dependency(
        &self,
        dependency: &DependencyDetails,
    ) -> Result<Option<i64>, RegistryError> {
        let overlap: Vec<&String> = dependency
            .required_tags
            .iter()
            .filter(|tag| dependency.forbidden_tags.contains(tag))
            .collect();
        if !overlap.is_empty() {
            warn!(
                "Dependency {} of plugin {} requires and forbids the same tags {overlap:?}, \
                 treating it as unsatisfiable",
                dependency.record.id, dependency.record.plugin_id
            );
            return Ok(None);
        }

        let candidates = self
            .plugin_repo
            .candidates(
                dependency.record.target_identifier.as_deref(),
                dependency.record.target_type.as_deref(),
            )
            .await?;
        let candidate_ids: Vec<i64> = candidates.iter().map(|candidate| candidate.id).collect();
        let tags = self.plugin_repo.tags_of_many(&candidate_ids).await?;

        // candidates come ordered best version first
        for candidate in candidates {
            if let Some(requirement) = &dependency.record.target_version {
                if !crate::model::version::version_matches_requirement(
                    &candidate.version,
                    requirement,
                ) {
                    continue;
                }
            }
            let empty = vec![];
            let candidate_tags = tags.get(&candidate.id).unwrap_or(&empty);
            let has_required = dependency
                .required_tags
                .iter()
                .all(|tag| candidate_tags.contains(tag));
            let has_forbidden = dependency
                .forbidden_tags
                .iter()
                .any(|tag| candidate_tags.contains(tag));
            if has_required && !has_forbidden {
                return Ok(Some(candidate.id));
            }
        }
        Ok(None)
    }
}
