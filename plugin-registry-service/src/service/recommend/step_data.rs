use std::sync::Arc;

use crate::model::recommendation::RecommendationContext;
use crate::repo::plugin::PluginRepo;
use crate::service::recommend::{VoteTask, Voter, item_patterns};

/// Votes based on the data of the current experiment step: the step inputs
/// always count, the step outputs only after a successful run with a known
/// result quality.
pub struct StepDataVoter {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl StepDataVoter {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }

    fn data_task(&self, items: Vec<(crate::model::MimePattern, crate::model::MimePattern)>) -> VoteTask {
        let plugin_repo = self.plugin_repo.clone();
        Box::pin(async move {
            let votes = plugin_repo.data_match_votes(&items).await?;
            Ok(votes.into_iter().map(|(id, vote)| (vote, id)).collect())
        })
    }
}

impl Voter for StepDataVoter {
    fn name(&self) -> &'static str {
        "StepDataRecommender"
    }

    fn vote_tasks(&self, context: &RecommendationContext) -> Vec<VoteTask> {
        if context.current_step.is_none() {
            return vec![];
        }
        let mut tasks = Vec::new();
        if !context.step_input_data.is_empty() {
            tasks.push(self.data_task(item_patterns(&context.step_input_data)));
        }
        let step_succeeded =
            context.step_success == Some(true) && context.step_error != Some(true);
        if step_succeeded
            && context.step_data_quality.is_some()
            && !context.step_output_data.is_empty()
        {
            tasks.push(self.data_task(item_patterns(&context.step_output_data)));
        }
        tasks
    }
}
