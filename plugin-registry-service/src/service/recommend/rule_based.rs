use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::model::recommendation::RecommendationContext;
use crate::repo::plugin::PluginRepo;
use crate::service::RegistryError;
use crate::service::recommend::{Vote, VoteTask, Voter};

/// A recommendation emitted by a matching rule: either a plugin (full id or
/// bare identifier) or a tag set, with an integer weight.
#[derive(Debug, Clone, Copy)]
pub struct RuleRecommendation {
    pub plugin_id: Option<&'static str>,
    pub tags: &'static [&'static str],
    pub weight: i64,
}

/// A rule matches by plugin id (with or without version) or by tag subset.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationRule {
    pub plugin_id: Option<&'static str>,
    pub tags: &'static [&'static str],
    pub recommend: RuleRecommendation,
}

const fn by_plugin(plugin_id: &'static str, recommend: RuleRecommendation) -> RecommendationRule {
    RecommendationRule {
        plugin_id: Some(plugin_id),
        tags: &[],
        recommend,
    }
}

const fn by_tags(tags: &'static [&'static str], recommend: RuleRecommendation) -> RecommendationRule {
    RecommendationRule {
        plugin_id: None,
        tags,
        recommend,
    }
}

const fn plugin(plugin_id: &'static str, weight: i64) -> RuleRecommendation {
    RuleRecommendation {
        plugin_id: Some(plugin_id),
        tags: &[],
        weight,
    }
}

const fn tags(tags: &'static [&'static str], weight: i64) -> RuleRecommendation {
    RuleRecommendation {
        plugin_id: None,
        tags,
        weight,
    }
}

/// The rule table is closed until a rule resource is added to the api.
pub const RULES: &[RecommendationRule] = &[
    by_plugin("costume-loader", plugin("wu-palmer", 5)),
    by_plugin("costume-loader", tags(&["data-cleaning"], 1)),
    by_plugin("muse-for-music-loader", plugin("wu-palmer", 5)),
    by_plugin("muse-for-music-loader", tags(&["data-cleaning"], 1)),
    by_tags(&["data-cleaning"], plugin("wu-palmer", 5)),
    by_plugin("wu-palmer", plugin("sym-max-mean", 5)),
    by_plugin("sym-max-mean", plugin("sim-to-dist-transformers", 5)),
    by_plugin("sim-to-dist-transformers", plugin("distance-aggregator", 5)),
    by_plugin("distance-aggregator", plugin("mds", 5)),
    by_plugin("mds", tags(&["clustering"], 2)),
];

fn strip_version(plugin_id: &str) -> &str {
    match plugin_id.find('@') {
        Some(position) => &plugin_id[..position],
        None => plugin_id,
    }
}

/// Walks the static rule table after a successful plugin run and votes for
/// the recommended follow-up plugins.
pub struct RuleBasedVoter {
    plugin_repo: Arc<dyn PluginRepo>,
}

impl RuleBasedVoter {
    pub fn new(plugin_repo: Arc<dyn PluginRepo>) -> Self {
        Self { plugin_repo }
    }
}

impl Voter for RuleBasedVoter {
    fn name(&self) -> &'static str {
        "RuleBasedRecommender"
    }

    fn vote_tasks(&self, context: &RecommendationContext) -> Vec<VoteTask> {
        // rules only apply to successful executions
        if context.step_success != Some(true) {
            return vec![];
        }
        let Some(current_plugin) = context.current_plugin else {
            return vec![];
        };
        let plugin_repo = self.plugin_repo.clone();
        vec![Box::pin(async move {
            evaluate_rules(plugin_repo, current_plugin).await
        })]
    }
}

async fn evaluate_rules(
    plugin_repo: Arc<dyn PluginRepo>,
    current_plugin_id: i64,
) -> Result<Vec<Vote>, RegistryError> {
    let Some(current) = plugin_repo.get(current_plugin_id).await? else {
        return Ok(vec![]);
    };
    let current_tags: HashSet<String> = plugin_repo
        .tags_of_many(&[current_plugin_id])
        .await?
        .remove(&current_plugin_id)
        .unwrap_or_default()
        .into_iter()
        .collect();
    let full_id = current.full_id();

    let mut identifier_votes: HashMap<&'static str, i64> = HashMap::new();
    let mut tag_votes: HashMap<BTreeSet<&'static str>, i64> = HashMap::new();
    for rule in RULES {
        let matches = match rule.plugin_id {
            Some(pattern) => pattern == full_id || pattern == current.identifier,
            None => {
                !rule.tags.is_empty()
                    && rule.tags.iter().all(|tag| current_tags.contains(*tag))
            }
        };
        if !matches {
            continue;
        }
        if let Some(recommended) = rule.recommend.plugin_id {
            *identifier_votes.entry(recommended).or_insert(0) += rule.recommend.weight;
        }
        if !rule.recommend.tags.is_empty() {
            *tag_votes
                .entry(rule.recommend.tags.iter().copied().collect())
                .or_insert(0) += rule.recommend.weight;
        }
    }

    let mut plugin_votes: HashMap<i64, i64> =
        gather_votes_by_identifier(&plugin_repo, &identifier_votes).await?;

    for (plugin_id, vote) in gather_votes_by_tags(&plugin_repo, &tag_votes).await? {
        let entry = plugin_votes.entry(plugin_id).or_insert(0);
        if *entry < vote {
            *entry = vote;
        }
    }

    Ok(plugin_votes
        .into_iter()
        .map(|(plugin_id, vote)| (vote as f64, plugin_id))
        .collect())
}

/// The recommended identifier may name a plugin with or without a version;
/// each matching catalog row gets the highest applicable vote.
async fn gather_votes_by_identifier(
    plugin_repo: &Arc<dyn PluginRepo>,
    identifier_votes: &HashMap<&'static str, i64>,
) -> Result<HashMap<i64, i64>, RegistryError> {
    let mut plugin_votes: HashMap<i64, i64> = HashMap::new();
    if identifier_votes.is_empty() {
        return Ok(plugin_votes);
    }
    let identifiers: Vec<String> = identifier_votes
        .keys()
        .map(|id| strip_version(id).to_string())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    let rows = plugin_repo.ids_by_identifiers(&identifiers).await?;
    for (db_id, identifier, version) in rows {
        let bare = identifier_votes.get(identifier.as_str()).copied().unwrap_or(0);
        let versioned = identifier_votes
            .get(format!("{identifier}@{version}").as_str())
            .copied()
            .unwrap_or(0);
        let vote = bare.max(versioned);
        if vote > 0 {
            let entry = plugin_votes.entry(db_id).or_insert(0);
            *entry = (*entry).max(vote);
        }
    }
    Ok(plugin_votes)
}

/// Tag set recommendations sum up across rules per plugin.
async fn gather_votes_by_tags(
    plugin_repo: &Arc<dyn PluginRepo>,
    tag_votes: &HashMap<BTreeSet<&'static str>, i64>,
) -> Result<HashMap<i64, i64>, RegistryError> {
    let mut sums: HashMap<i64, i64> = HashMap::new();
    for (tag_set, weight) in tag_votes {
        let names: Vec<String> = tag_set.iter().map(ToString::to_string).collect();
        for plugin_id in plugin_repo.ids_with_all_tags(&names).await? {
            *sums.entry(plugin_id).or_insert(0) += weight;
        }
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn versions_are_stripped_from_plugin_ids() {
        assert_eq!(strip_version("wu-palmer@1.0"), "wu-palmer");
        assert_eq!(strip_version("wu-palmer"), "wu-palmer");
    }

    #[test]
    fn the_rule_table_recommends_the_processing_chain() {
        let from_mds: Vec<_> = RULES
            .iter()
            .filter(|rule| rule.plugin_id == Some("mds"))
            .collect();
        assert_eq!(from_mds.len(), 1);
        assert_eq!(from_mds[0].recommend.tags, &["clustering"]);
        assert_eq!(from_mds[0].recommend.weight, 2);
    }
}
