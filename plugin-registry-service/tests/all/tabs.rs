use std::collections::BTreeSet;

use plugin_registry_service::service::RegistryError;
use plugin_registry_service::service::templates::TabParams;
use test_r::test;

use crate::all::{plugin_insert, test_env};

fn tab_params(filter_string: &str) -> TabParams {
    TabParams {
        name: "clustering".to_string(),
        description: "clustering plugins".to_string(),
        sort_key: 0,
        location: "workspace".to_string(),
        icon: None,
        group_key: None,
        filter_string: filter_string.to_string(),
    }
}

#[test]
async fn tab_filters_materialize_the_matching_plugins() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let templates = &env.services.templates;

    let mut expected = BTreeSet::new();
    repo.create(&plugin_insert("k-means", "0.9", &["clustering"]))
        .await
        .unwrap();
    expected.insert(
        repo.create(&plugin_insert("k-means", "1.2", &["clustering"]))
            .await
            .unwrap(),
    );
    repo.create(&plugin_insert("k-means", "2.0", &["clustering"]))
        .await
        .unwrap();
    expected.insert(
        repo.create(&plugin_insert("dbscan", "1.1", &["clustering"]))
            .await
            .unwrap(),
    );
    repo.create(&plugin_insert("csv-loader", "1.5", &["data-loading"]))
        .await
        .unwrap();

    let template = templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();
    let tab = templates
        .create_tab(
            template.id,
            tab_params(r#"{"and": [{"tag": "clustering"}, {"version": ">=1.0.0,<2.0.0"}]}"#),
        )
        .await
        .unwrap();

    let members: BTreeSet<i64> = templates
        .tab_plugin_ids(tab.id)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(members, expected);
}

#[test]
async fn new_plugins_enter_matching_tabs() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let templates = &env.services.templates;

    let template = templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();
    let tab = templates
        .create_tab(template.id, tab_params(r#"{"tag": "clustering"}"#))
        .await
        .unwrap();
    assert!(templates.tab_plugin_ids(tab.id).await.unwrap().is_empty());

    let plugin_id = repo
        .create(&plugin_insert("k-means", "1.0.0", &["clustering"]))
        .await
        .unwrap();
    env.services.tabs.update_plugin_lists(plugin_id).await.unwrap();

    assert_eq!(
        templates.tab_plugin_ids(tab.id).await.unwrap(),
        vec![plugin_id]
    );
}

#[test]
async fn invalid_filters_are_rejected_and_create_no_tab() {
    let env = test_env().await;
    let templates = &env.services.templates;

    let template = templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();

    let result = templates
        .create_tab(template.id, tab_params(r#"{"version": "not-a-spec"}"#))
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidFilter(_))));
    assert!(
        env.services
            .template_repo
            .all_tabs()
            .await
            .unwrap()
            .is_empty()
    );

    let result = templates
        .create_tab(template.id, tab_params(r#"{"tag": "a", "type": "b"}"#))
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidFilter(_))));
}

#[test]
async fn group_tabs_must_not_carry_filters_or_live_in_the_workspace() {
    let env = test_env().await;
    let templates = &env.services.templates;
    let template = templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();

    let mut params = tab_params(r#"{"tag": "clustering"}"#);
    params.group_key = Some("experiments".to_string());
    let result = templates.create_tab(template.id, params).await;
    assert!(matches!(result, Err(RegistryError::InvalidRequest(_))));

    let mut params = tab_params("");
    params.group_key = Some("experiments".to_string());
    params.location = "workspace".to_string();
    let result = templates.create_tab(template.id, params).await;
    assert!(matches!(result, Err(RegistryError::InvalidRequest(_))));

    let mut params = tab_params("");
    params.group_key = Some("experiments".to_string());
    params.location = "navigation".to_string();
    assert!(templates.create_tab(template.id, params).await.is_ok());
}

#[test]
async fn updating_a_tab_filter_rewrites_the_membership() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let templates = &env.services.templates;

    let clustering = repo
        .create(&plugin_insert("k-means", "1.0.0", &["clustering"]))
        .await
        .unwrap();
    let loading = repo
        .create(&plugin_insert("csv-loader", "1.0.0", &["data-loading"]))
        .await
        .unwrap();

    let template = templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();
    let tab = templates
        .create_tab(template.id, tab_params(r#"{"tag": "clustering"}"#))
        .await
        .unwrap();
    assert_eq!(
        templates.tab_plugin_ids(tab.id).await.unwrap(),
        vec![clustering]
    );

    templates
        .update_tab(
            template.id,
            tab.id,
            tab_params(r#"{"tag": "data-loading"}"#),
        )
        .await
        .unwrap();
    assert_eq!(
        templates.tab_plugin_ids(tab.id).await.unwrap(),
        vec![loading]
    );
}
