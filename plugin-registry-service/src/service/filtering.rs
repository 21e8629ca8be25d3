use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::filter::{FILTER_BATCH_SIZE, PluginFilter, PluginMatchRow};
use crate::repo::plugin::PluginRepo;
use crate::service::RegistryError;

/// Evaluates plugin filters against the full catalog in batches so that the
/// plugin table is never held in memory at once.
pub struct FilteringService {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl FilteringService {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }

    /// All plugin ids matching the filter.
    pub async fn evaluate(&self, filter: &PluginFilter) -> Result<Vec<i64>, RegistryError> {
        let count = self.plugin_repo.count().await?;
        let mut matches: Vec<i64> = Vec::new();
        let mut offset = 0;
        while offset < count {
            let records = self.plugin_repo.batch(offset, FILTER_BATCH_SIZE).await?;
            if records.is_empty() {
                break;
            }
            let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
            let mut tags = self.plugin_repo.tags_of_many(&ids).await?;
            let batch: BTreeMap<i64, PluginMatchRow> = records
                .into_iter()
                .map(|record| {
                    (
                        record.id,
                        PluginMatchRow {
                            id: record.id,
                            identifier: record.identifier,
                            version: record.version,
                            title: record.title,
                            plugin_type: record.plugin_type,
                            tags: tags
                                .remove(&record.id)
                                .unwrap_or_default()
                                .into_iter()
                                .collect(),
                        },
                    )
                })
                .collect();
            matches.extend(filter.select(&batch));
            offset += FILTER_BATCH_SIZE;
        }
        Ok(matches)
    }
}
