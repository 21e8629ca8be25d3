use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plugin_registry_service::config::{RecommendationConfig, RegistryServiceConfig};
use plugin_registry_service::model::recommendation::{DataItem, RecommendationContext};
use plugin_registry_service::service::recommend::{
    RecommendationService, VoteTask, Voter,
};
use test_r::test;

use crate::all::{consumed_data, plugin_insert, test_env, test_env_with_config};

fn entity_list_item() -> DataItem {
    DataItem {
        data_type: "entity/list".to_string(),
        content_type: "application/json".to_string(),
        name: None,
    }
}

#[test]
async fn current_data_votes_are_weighted_by_configuration() {
    let config = RegistryServiceConfig {
        recommendations: RecommendationConfig {
            weights: HashMap::from([("CurrentDataRecommender".to_string(), 2.0)]),
            ..RecommendationConfig::default()
        },
        ..RegistryServiceConfig::default()
    };
    let env = test_env_with_config(config).await;
    let repo = &env.services.plugin_repo;

    let mut matching = plugin_insert("analyzer", "1.0.0", &[]);
    matching.data = vec![consumed_data("entity/list", &["application/json"], true)];
    let matching_id = repo.create(&matching).await.unwrap();

    let mut other = plugin_insert("graph-tool", "1.0.0", &[]);
    other.data = vec![consumed_data("graph/edge", &["application/json"], true)];
    repo.create(&other).await.unwrap();

    let context = RecommendationContext {
        current_data: vec![entity_list_item()],
        ..RecommendationContext::default()
    };
    let votes = env
        .services
        .recommendations
        .recommend(context, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].0, matching_id);
    // one full vote multiplied by the configured weight
    assert!((votes[0].1 - 2.0).abs() < f64::EPSILON);
}

#[test]
async fn recommendations_only_contain_processing_and_conversion_plugins() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut processing = plugin_insert("analyzer", "1.0.0", &[]);
    processing.data = vec![consumed_data("entity/list", &["application/json"], true)];
    let processing_id = repo.create(&processing).await.unwrap();

    let mut visualization = plugin_insert("plotter", "1.0.0", &[]);
    visualization.plugin_type = "visualization".to_string();
    visualization.data = vec![consumed_data("entity/list", &["application/json"], true)];
    repo.create(&visualization).await.unwrap();

    let context = RecommendationContext {
        current_data: vec![entity_list_item()],
        ..RecommendationContext::default()
    };
    let votes = env
        .services
        .recommendations
        .recommend(context, Duration::from_secs(5))
        .await
        .unwrap();

    let ids: Vec<i64> = votes.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![processing_id]);
}

#[test]
async fn unmet_data_requirements_exclude_plugins_from_the_result() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut satisfiable = plugin_insert("analyzer", "1.0.0", &[]);
    satisfiable.data = vec![consumed_data("entity/list", &["application/json"], true)];
    let satisfiable_id = repo.create(&satisfiable).await.unwrap();

    let mut unsatisfiable = plugin_insert("graph-tool", "1.0.0", &[]);
    unsatisfiable.data = vec![consumed_data("graph/edge", &["application/json"], true)];
    repo.create(&unsatisfiable).await.unwrap();

    let context = RecommendationContext {
        available_data: Some(BTreeMap::from([(
            "entity/list".to_string(),
            vec!["application/json".to_string()],
        )])),
        ..RecommendationContext::default()
    };
    let votes = env
        .services
        .recommendations
        .recommend(context, Duration::from_secs(5))
        .await
        .unwrap();

    let ids: Vec<i64> = votes.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![satisfiable_id]);
}

struct SlowVoter;

impl Voter for SlowVoter {
    fn name(&self) -> &'static str {
        "SlowVoter"
    }

    fn vote_tasks(&self, _context: &RecommendationContext) -> Vec<VoteTask> {
        vec![Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![(1.0, 1)])
        })]
    }
}

struct FixedVoter {
    plugin_id: i64,
}

impl Voter for FixedVoter {
    fn name(&self) -> &'static str {
        "FixedVoter"
    }

    fn vote_tasks(&self, _context: &RecommendationContext) -> Vec<VoteTask> {
        let plugin_id = self.plugin_id;
        vec![Box::pin(async move { Ok(vec![(1.0, plugin_id)]) })]
    }
}

#[test]
async fn blocked_voters_do_not_delay_the_recommendation() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let plugin_id = repo.create(&plugin_insert("analyzer", "1.0.0", &[])).await.unwrap();

    let recommendations = RecommendationService::with_voters(
        vec![Arc::new(SlowVoter), Arc::new(FixedVoter { plugin_id })],
        env.services.plugin_repo.clone(),
        env.services.service_repo.clone(),
        reqwest::Client::new(),
        &RecommendationConfig::default(),
    );

    let started = Instant::now();
    let votes = recommendations
        .recommend(RecommendationContext::default(), Duration::from_millis(500))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(10),
        "recommendation took {elapsed:?} despite the timeout"
    );
    let ids: Vec<i64> = votes.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![plugin_id]);
}
