use std::sync::Arc;

use crate::model::recommendation::RecommendationContext;
use crate::repo::plugin::PluginRepo;
use crate::service::recommend::{VoteTask, Voter, item_patterns};

/// Votes for plugins whose required consumed data matches the data the
/// recommendation was requested for.
pub struct CurrentDataVoter {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl CurrentDataVoter {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }
}

impl Voter for CurrentDataVoter {
    fn name(&self) -> &'static str {
        "CurrentDataRecommender"
    }

    fn vote_tasks(&self, context: &RecommendationContext) -> Vec<VoteTask> {
        if context.current_data.is_empty() {
            return vec![];
        }
        let plugin_repo = self.plugin_repo.clone();
        let items = item_patterns(&context.current_data);
        vec![Box::pin(async move {
            let votes = plugin_repo.data_match_votes(&items).await?;
            Ok(votes.into_iter().map(|(id, vote)| (vote, id)).collect())
        })]
    }
}
