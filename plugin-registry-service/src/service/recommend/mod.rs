use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::RecommendationConfig;
use crate::model::MimePattern;
use crate::model::recommendation::{AvailableData, DataItem, RecommendationContext};
use crate::repo::plugin::PluginRepo;
use crate::repo::service::ServiceRepo;
use crate::service::RegistryError;

pub mod context;

mod available_data;
mod current_data;
mod rule_based;
mod step_data;

pub use available_data::AvailableDataVoter;
pub use current_data::CurrentDataVoter;
pub use rule_based::RuleBasedVoter;
pub use step_data::StepDataVoter;

/// A single `(vote, plugin id)` pair emitted by a voter task.
pub type Vote = (f64, i64);

pub type VoteTask = BoxFuture<'static, Result<Vec<Vote>, RegistryError>>;

/// A pluggable recommendation producer.
///
/// `vote_tasks` inspects the context and returns zero or more asynchronous
/// vote producers; the engine runs all tasks of all voters as one group
/// bounded by the request deadline.
pub trait Voter: Send + Sync {
    fn name(&self) -> &'static str;

    fn vote_tasks(&self, context: &RecommendationContext) -> Vec<VoteTask>;
}

/// Runs the voter ensemble and folds the weighted votes into an admissible,
/// score sorted recommendation list.
pub struct RecommendationService {
    voters: Vec<Arc<dyn Voter>>,
    weights: HashMap<String, f64>,
    plugin_repo: Arc<dyn PluginRepo>,
    gatherer: context::ContextGatherer,
    default_timeout: Duration,
    default_limit: u64,
}

impl RecommendationService {
    /// Builds the service with the built in voter ensemble.
    pub fn new(
        plugin_repo: Arc<dyn PluginRepo>,
        service_repo: Arc<dyn ServiceRepo>,
        client: reqwest::Client,
        config: &RecommendationConfig,
    ) -> Self {
        let voters: Vec<Arc<dyn Voter>> = vec![
            Arc::new(CurrentDataVoter::new(plugin_repo.clone())),
            Arc::new(AvailableDataVoter::new(plugin_repo.clone())),
            Arc::new(StepDataVoter::new(plugin_repo.clone())),
            Arc::new(RuleBasedVoter::new(plugin_repo.clone())),
        ];
        Self::with_voters(voters, plugin_repo, service_repo, client, config)
    }

    /// Builds the service with a custom voter table. The table is fixed at
    /// startup and never mutated afterwards.
    pub fn with_voters(
        voters: Vec<Arc<dyn Voter>>,
        plugin_repo: Arc<dyn PluginRepo>,
        service_repo: Arc<dyn ServiceRepo>,
        client: reqwest::Client,
        config: &RecommendationConfig,
    ) -> Self {
        Self {
            voters,
            weights: config.weights.clone(),
            plugin_repo: plugin_repo.clone(),
            gatherer: context::ContextGatherer::new(service_repo, plugin_repo, client),
            default_timeout: Duration::from_secs_f64(config.timeout_seconds.max(0.1)),
            default_limit: config.limit.max(1),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    /// Computes recommendations: context enrichment, parallel vote
    /// collection bounded by the timeout, weighted merge and the
    /// admissibility filter. Voters that do not finish in time are simply
    /// not counted.
    pub async fn recommend(
        &self,
        context: RecommendationContext,
        timeout: Duration,
    ) -> Result<Vec<(i64, f64)>, RegistryError> {
        let context = self.gatherer.gather(context, timeout).await;
        let votes = self.collect_votes(&context, timeout).await;
        let merged = merge_votes(&votes, &self.weights);
        self.filter_admissible(&context, merged).await
    }

    async fn collect_votes(
        &self,
        context: &RecommendationContext,
        timeout: Duration,
    ) -> Vec<(String, Vec<Vote>)> {
        let mut join_set: JoinSet<(&'static str, Result<Vec<Vote>, RegistryError>)> =
            JoinSet::new();
        for voter in &self.voters {
            for task in voter.vote_tasks(context) {
                let name = voter.name();
                join_set.spawn(async move { (name, task.await) });
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut results: Vec<(String, Vec<Vote>)> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((name, Ok(votes))))) => results.push((name.to_string(), votes)),
                Ok(Some(Ok((name, Err(err))))) => {
                    warn!("Recommendation voter '{name}' failed: {err}");
                }
                Ok(Some(Err(join_error))) => {
                    warn!("Recommendation voter task failed: {join_error}");
                }
                Ok(None) => break,
                Err(_) => {
                    // deadline reached, keep the votes collected so far
                    join_set.abort_all();
                    break;
                }
            }
        }
        results
    }

    /// Drops plugins that are not for working with data and plugins with
    /// required inputs that the available data cannot satisfy.
    async fn filter_admissible(
        &self,
        context: &RecommendationContext,
        votes: Vec<(i64, f64)>,
    ) -> Result<Vec<(i64, f64)>, RegistryError> {
        let mut excluded: HashSet<i64> =
            self.plugin_repo.inadmissible_type_ids().await?.into_iter().collect();
        if let Some(available) = &context.available_data {
            if !available.is_empty() {
                excluded.extend(
                    self.plugin_repo
                        .unmet_requirement_ids(&available_patterns(available))
                        .await?,
                );
            }
        }
        if excluded.is_empty() {
            return Ok(votes);
        }
        Ok(votes
            .into_iter()
            .filter(|(plugin_id, _)| !excluded.contains(plugin_id))
            .collect())
    }
}

/// Folds `(voter, votes)` results with per voter weights into a score sorted
/// list. Unknown voters count with weight 1.
pub fn merge_votes(
    results: &[(String, Vec<Vote>)],
    multipliers: &HashMap<String, f64>,
) -> Vec<(i64, f64)> {
    let mut scores: BTreeMap<i64, f64> = BTreeMap::new();
    for (voter, votes) in results {
        let weight = multipliers.get(voter).copied().unwrap_or(1.0);
        for (vote, plugin_id) in votes {
            *scores.entry(*plugin_id).or_insert(0.0) += vote * weight;
        }
    }
    let mut merged: Vec<(i64, f64)> = scores.into_iter().collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    merged
}

pub(crate) fn item_patterns(items: &[DataItem]) -> Vec<(MimePattern, MimePattern)> {
    items
        .iter()
        .map(|item| {
            (
                MimePattern::parse(&item.data_type),
                MimePattern::parse(&item.content_type),
            )
        })
        .collect()
}

pub(crate) fn available_patterns(available: &AvailableData) -> Vec<(MimePattern, Vec<MimePattern>)> {
    available
        .iter()
        .map(|(data_type, content_types)| {
            (
                MimePattern::parse(data_type),
                content_types
                    .iter()
                    .map(|content_type| MimePattern::parse(content_type))
                    .collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn votes_are_weighted_and_summed_per_plugin() {
        let results = vec![
            ("a".to_string(), vec![(1.0, 1), (0.5, 2)]),
            ("b".to_string(), vec![(1.0, 1)]),
        ];
        let weights = HashMap::from([("b".to_string(), 3.0)]);
        let merged = merge_votes(&results, &weights);
        assert_eq!(merged, vec![(1, 4.0), (2, 0.5)]);
    }

    #[test]
    fn merged_votes_sort_by_score_descending() {
        let results = vec![("a".to_string(), vec![(0.1, 1), (0.9, 2), (0.5, 3)])];
        let merged = merge_votes(&results, &HashMap::new());
        let ids: Vec<i64> = merged.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
