use std::sync::Arc;

use tracing::warn;

use crate::model::filter::PluginFilter;
use crate::repo::template::TemplateRepo;
use crate::service::RegistryError;
use crate::service::filtering::FilteringService;

/// Keeps the materialized `tab -> plugins` membership in sync with the tab
/// filter expressions.
pub struct TabService {
    template_repo: Arc<dyn TemplateRepo>,
    filtering: Arc<FilteringService>,
}

impl TabService {
    pub fn new(template_repo: Arc<dyn TemplateRepo>, filtering: Arc<FilteringService>) -> Self {
        Self {
            template_repo,
            filtering,
        }
    }

    /// Re-evaluates the filter of a single tab and replaces its membership.
    pub async fn apply_filter_for_tab(&self, tab_id: i64) -> Result<(), RegistryError> {
        let Some(tab) = self.template_repo.get_tab(tab_id).await? else {
            warn!("Tab with id {tab_id} not found");
            return Ok(());
        };
        if tab.group_key.as_deref().is_some_and(|key| !key.is_empty()) {
            // group tabs carry no filter and have no membership
            return Ok(());
        }
        if tab.filter_string.trim().is_empty() {
            self.template_repo.set_tab_plugins(tab_id, &[]).await?;
            return Ok(());
        }
        let filter = match PluginFilter::parse(&tab.filter_string) {
            Ok(filter) => filter,
            Err(err) => {
                warn!("Invalid filter on tab {tab_id}: {err}");
                return Ok(());
            }
        };
        let plugin_ids = self.filtering.evaluate(&filter).await?;
        self.template_repo
            .set_tab_plugins(tab_id, &plugin_ids)
            .await?;
        Ok(())
    }

    /// Re-evaluates every tab filter after a plugin has been added; tabs that
    /// now contain the plugin get their membership rewritten.
    pub async fn update_plugin_lists(&self, plugin_id: i64) -> Result<(), RegistryError> {
        for tab in self.template_repo.all_tabs().await? {
            if tab.group_key.as_deref().is_some_and(|key| !key.is_empty())
                || tab.filter_string.trim().is_empty()
            {
                continue;
            }
            let filter = match PluginFilter::parse(&tab.filter_string) {
                Ok(filter) => filter,
                Err(err) => {
                    warn!("Invalid filter on tab {}: {err}", tab.id);
                    continue;
                }
            };
            let plugin_ids = self.filtering.evaluate(&filter).await?;
            if plugin_ids.contains(&plugin_id) {
                self.template_repo
                    .set_tab_plugins(tab.id, &plugin_ids)
                    .await?;
            }
        }
        Ok(())
    }
}
