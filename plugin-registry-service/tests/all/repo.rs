use chrono::{Duration, Utc};
use plugin_registry_service::config::{PurgeAfter, RegistryServiceConfig};
use plugin_registry_service::repo::RepoError;
use plugin_registry_service::repo::template::{TabInsert, TemplateInsert};
use test_r::test;

use crate::all::{consumed_data, dependency_on, plugin_insert, produced_data, test_env};

#[test]
async fn plugin_create_and_details_roundtrip() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut insert = plugin_insert("k-means", "1.2.0", &["clustering", "ml"]);
    insert.data = vec![
        consumed_data("entity/vector", &["application/json"], true),
        produced_data("entity/label", &["application/json", "text/csv"]),
    ];
    insert.dependencies = vec![dependency_on("distance", Some(">=1.0.0"))];

    let id = repo.create(&insert).await.unwrap();

    let record = repo.get(id).await.unwrap().unwrap();
    assert_eq!(record.identifier, "k-means");
    assert_eq!(record.sort_version, "00!0001.0002.0000");

    let details = repo
        .details_many(&[id])
        .await
        .unwrap()
        .remove(&id)
        .unwrap();
    assert_eq!(details.tags, vec!["clustering", "ml"]);
    assert_eq!(details.data.len(), 2);
    let produced = details
        .data
        .iter()
        .find(|data| data.record.relation == "produced")
        .unwrap();
    assert_eq!(produced.content_types.len(), 2);
    assert_eq!(details.dependencies.len(), 1);
    assert_eq!(
        details.dependencies[0].record.target_identifier.as_deref(),
        Some("distance")
    );
}

#[test]
async fn plugin_identifier_and_version_are_unique() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    repo.create(&plugin_insert("p", "1.0.0", &[])).await.unwrap();
    let duplicate = repo.create(&plugin_insert("p", "1.0.0", &[])).await;
    assert!(matches!(duplicate, Err(RepoError::UniqueViolation(_))));

    // a different version of the same plugin is fine
    repo.create(&plugin_insert("p", "1.1.0", &[])).await.unwrap();
}

#[test]
async fn deleting_a_plugin_cascades_to_owned_rows_but_not_tags() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let template_repo = &env.services.template_repo;

    let mut insert = plugin_insert("p", "1.0.0", &["clustering"]);
    insert.data = vec![consumed_data("entity/vector", &["application/json"], true)];
    insert.dependencies = vec![dependency_on("other", None)];
    let id = repo.create(&insert).await.unwrap();

    let template_id = template_repo
        .create_template(&TemplateInsert {
            name: "t".to_string(),
            description: String::new(),
            tags: vec![],
        })
        .await
        .unwrap();
    let tab_id = template_repo
        .create_tab(
            template_id,
            &TabInsert {
                name: "tab".to_string(),
                description: String::new(),
                sort_key: 0,
                location: "workspace".to_string(),
                icon: None,
                group_key: None,
                filter_string: "{}".to_string(),
            },
        )
        .await
        .unwrap();
    template_repo.set_tab_plugins(tab_id, &[id]).await.unwrap();

    assert!(repo.delete(id).await.unwrap());

    let io_count: i64 = sqlx::query_scalar("SELECT count(*) FROM io_data")
        .fetch_one(env.pool.as_ref())
        .await
        .unwrap();
    let content_type_count: i64 = sqlx::query_scalar("SELECT count(*) FROM content_types")
        .fetch_one(env.pool.as_ref())
        .await
        .unwrap();
    let dependency_count: i64 = sqlx::query_scalar("SELECT count(*) FROM dependencies")
        .fetch_one(env.pool.as_ref())
        .await
        .unwrap();
    let tag_count: i64 = sqlx::query_scalar("SELECT count(*) FROM tags")
        .fetch_one(env.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(io_count, 0);
    assert_eq!(content_type_count, 0);
    assert_eq!(dependency_count, 0);
    // shared tags survive the plugin
    assert!(tag_count >= 1);
    assert!(template_repo.tab_plugin_ids(tab_id).await.unwrap().is_empty());
}

#[test]
async fn purge_removes_only_plugins_behind_the_anchor() {
    let config = RegistryServiceConfig {
        discovery: plugin_registry_service::config::DiscoveryConfig {
            purge_after: PurgeAfter::Seconds(60),
            ..Default::default()
        },
        ..Default::default()
    };
    let env = crate::all::test_env_with_config(config).await;
    let repo = &env.services.plugin_repo;

    let now = Utc::now();
    let fresh = repo.create(&plugin_insert("fresh", "1.0.0", &[])).await.unwrap();
    let edge = repo.create(&plugin_insert("edge", "1.0.0", &[])).await.unwrap();
    let stale = repo.create(&plugin_insert("stale", "1.0.0", &[])).await.unwrap();
    repo.touch(fresh, now).await.unwrap();
    // exactly at the threshold, must be kept
    repo.touch(edge, now - Duration::seconds(60)).await.unwrap();
    repo.touch(stale, now - Duration::seconds(61)).await.unwrap();

    let purged = env.services.discovery.purge().await.unwrap();
    assert_eq!(purged, 1);
    assert!(repo.get(fresh).await.unwrap().is_some());
    assert!(repo.get(edge).await.unwrap().is_some());
    assert!(repo.get(stale).await.unwrap().is_none());
}

#[test]
async fn purge_never_and_auto_configurations() {
    let config = RegistryServiceConfig {
        discovery: plugin_registry_service::config::DiscoveryConfig {
            purge_after: PurgeAfter::Keyword("never".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let env = crate::all::test_env_with_config(config).await;
    let repo = &env.services.plugin_repo;

    let old = repo.create(&plugin_insert("old", "1.0.0", &[])).await.unwrap();
    repo.touch(old, Utc::now() - Duration::days(365)).await.unwrap();
    repo.create(&plugin_insert("new", "1.0.0", &[])).await.unwrap();

    assert_eq!(env.services.discovery.purge().await.unwrap(), 0);
    assert!(repo.get(old).await.unwrap().is_some());
}

#[test]
async fn dependencies_resolve_to_the_best_matching_plugin() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut insert = plugin_insert("consumer", "1.0.0", &[]);
    insert.dependencies = vec![dependency_on("helper", Some(">=1.0.0, <2.0.0"))];
    repo.create(&insert).await.unwrap();

    repo.create(&plugin_insert("helper", "0.9.0", &[])).await.unwrap();
    let expected = repo.create(&plugin_insert("helper", "1.5.0", &[])).await.unwrap();
    repo.create(&plugin_insert("helper", "2.1.0", &[])).await.unwrap();

    env.services.plugins.resolve_all_dependencies().await.unwrap();

    let dependencies = repo.all_dependencies().await.unwrap();
    assert_eq!(dependencies.len(), 1);
    assert_eq!(dependencies[0].record.best_match_id, Some(expected));
}

#[test]
async fn dependencies_with_impossible_tag_sets_stay_unresolved() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut insert = plugin_insert("consumer", "1.0.0", &[]);
    let mut dependency = dependency_on("helper", None);
    dependency.required_tags = vec!["fast".to_string()];
    dependency.forbidden_tags = vec!["fast".to_string()];
    insert.dependencies = vec![dependency];
    repo.create(&insert).await.unwrap();
    repo.create(&plugin_insert("helper", "1.0.0", &["fast"])).await.unwrap();

    env.services.plugins.resolve_all_dependencies().await.unwrap();

    let dependencies = repo.all_dependencies().await.unwrap();
    assert_eq!(dependencies[0].record.best_match_id, None);
}
