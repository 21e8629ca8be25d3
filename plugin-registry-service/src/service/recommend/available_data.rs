use std::sync::Arc;

use crate::model::recommendation::RecommendationContext;
use crate::repo::plugin::PluginRepo;
use crate::service::recommend::{VoteTask, Voter, available_patterns};

/// Votes for every plugin whose required consumed data can be fulfilled from
/// the data available in the experiment. Suppressed when the recommendation
/// targets specific data.
pub struct AvailableDataVoter {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl AvailableDataVoter {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }
}

impl Voter for AvailableDataVoter {
    fn name(&self) -> &'static str {
        "AvailableDataRecommender"
    }

    fn vote_tasks(&self, context: &RecommendationContext) -> Vec<VoteTask> {
        let Some(available) = &context.available_data else {
            return vec![];
        };
        if available.is_empty() {
            return vec![];
        }
        if !context.current_data.is_empty() || !context.step_output_data.is_empty() {
            // a recommendation for specific data must not recommend on all data
            return vec![];
        }
        let plugin_repo = self.plugin_repo.clone();
        let available = available_patterns(available);
        vec![Box::pin(async move {
            let ids = plugin_repo.satisfiable_ids(&available).await?;
            Ok(ids.into_iter().map(|id| (1.0, id)).collect())
        })]
    }
}
