use std::collections::BTreeSet;

use plugin_registry_service::repo::pagination::PageRequest;
use plugin_registry_service::repo::plugin::PluginCriteria;
use plugin_registry_service::service::plugin::PluginQuery;
use test_r::test;

use crate::all::{consumed_data, plugin_insert, test_env};

#[test]
async fn cursor_pagination_visits_every_row_exactly_once() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    for index in 0..60 {
        repo.create(&plugin_insert(&format!("plugin-{index:03}"), "1.0.0", &[]))
            .await
            .unwrap();
    }

    let criteria = PluginCriteria::default();
    let mut page_request = PageRequest {
        item_count: 25,
        ..PageRequest::default()
    };

    let mut seen: Vec<String> = Vec::new();
    loop {
        let (info, records) = repo.find_page(&criteria, &page_request).await.unwrap();
        assert_eq!(info.collection_size, 60);
        if records.is_empty() {
            break;
        }
        let next_cursor = records.last().map(|record| record.id);
        seen.extend(records.into_iter().map(|record| record.identifier));
        if seen.len() >= 60 {
            break;
        }
        page_request.cursor = next_cursor;
    }

    assert_eq!(seen.len(), 60);
    // default sort is identifier ascending, every row exactly once
    let unique: BTreeSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 60);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

#[test]
async fn page_two_contains_rows_26_to_50() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;

    let mut ids = Vec::new();
    for index in 0..60 {
        ids.push(
            repo.create(&plugin_insert(&format!("plugin-{index:03}"), "1.0.0", &[]))
                .await
                .unwrap(),
        );
    }

    let criteria = PluginCriteria::default();
    let first_page = PageRequest {
        item_count: 25,
        ..PageRequest::default()
    };
    let (info, records) = repo.find_page(&criteria, &first_page).await.unwrap();
    assert_eq!(info.cursor_page, 1);
    assert_eq!(records.len(), 25);
    let cursor = records.last().unwrap().id;

    let second_page = PageRequest {
        cursor: Some(cursor),
        item_count: 25,
        ..PageRequest::default()
    };
    let (info, records) = repo.find_page(&criteria, &second_page).await.unwrap();
    assert_eq!(info.cursor_page, 2);
    assert_eq!(records.len(), 25);
    assert_eq!(records[0].identifier, "plugin-025");
    assert_eq!(records[24].identifier, "plugin-049");
    assert_eq!(info.last_page.unwrap().page, 3);
    assert!(
        info.surrounding_pages
            .iter()
            .all(|page| page.page != info.cursor_page)
    );
}

#[test]
async fn small_collections_fit_on_a_single_page() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    for index in 0..3 {
        repo.create(&plugin_insert(&format!("p{index}"), "1.0.0", &[]))
            .await
            .unwrap();
    }

    let (info, records) = repo
        .find_page(&PluginCriteria::default(), &PageRequest::default())
        .await
        .unwrap();
    assert_eq!(info.collection_size, 3);
    assert_eq!(info.cursor_page, 1);
    assert!(info.surrounding_pages.is_empty());
    assert_eq!(records.len(), 3);
}

#[test]
async fn unknown_cursors_start_at_the_first_row() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    for index in 0..30 {
        repo.create(&plugin_insert(&format!("p{index:02}"), "1.0.0", &[]))
            .await
            .unwrap();
    }

    let request = PageRequest {
        cursor: Some(99999),
        item_count: 25,
        ..PageRequest::default()
    };
    let (info, records) = repo
        .find_page(&PluginCriteria::default(), &request)
        .await
        .unwrap();
    assert_eq!(info.cursor_row, 0);
    assert_eq!(info.cursor_page, 1);
    assert_eq!(records[0].identifier, "p00");
}

#[test]
async fn version_sort_orders_numerically_via_the_sort_key() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    for version in ["0.9.0", "1.10.0", "1.2.0"] {
        repo.create(&plugin_insert("p", version, &[])).await.unwrap();
    }

    // default sort is name ascending, version descending
    let (_, records) = repo
        .find_page(&PluginCriteria::default(), &PageRequest::default())
        .await
        .unwrap();
    let versions: Vec<&str> = records.iter().map(|record| record.version.as_str()).collect();
    assert_eq!(versions, vec!["1.10.0", "1.2.0", "0.9.0"]);
}

#[test]
async fn catalog_criteria_filter_the_page() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let plugins = &env.services.plugins;

    let mut matching = plugin_insert("loader", "1.0.0", &["data-loading"]);
    matching.data = vec![consumed_data("entity/list", &["application/json"], true)];
    let matching_id = repo.create(&matching).await.unwrap();
    repo.create(&plugin_insert("other", "1.0.0", &["visualization"]))
        .await
        .unwrap();

    // tag criterion
    let query = PluginQuery {
        tags: Some("data-loading".to_string()),
        ..PluginQuery::default()
    };
    let (info, result) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 1);
    assert_eq!(result[0].id, matching_id);

    // unknown required tags can never match
    let query = PluginQuery {
        tags: Some("does-not-exist".to_string()),
        ..PluginQuery::default()
    };
    let (info, result) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 0);
    assert!(result.is_empty());

    // forbidden tag criterion
    let query = PluginQuery {
        tags: Some("!visualization".to_string()),
        ..PluginQuery::default()
    };
    let (info, _) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 1);

    // input data criterion with wildcards
    let query = PluginQuery {
        input_data_type: Some("entity/*".to_string()),
        input_content_type: Some("application/json".to_string()),
        ..PluginQuery::default()
    };
    let (info, result) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 1);
    assert_eq!(result[0].id, matching_id);
}

#[test]
async fn version_range_criteria_need_an_identifier() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let plugins = &env.services.plugins;

    for version in ["0.9.0", "1.2.0", "2.0.0"] {
        repo.create(&plugin_insert("k-means", version, &[])).await.unwrap();
    }

    let query = PluginQuery {
        identifier: Some("k-means".to_string()),
        version: Some(">=1.0.0,<2.0.0".to_string()),
        ..PluginQuery::default()
    };
    let (info, result) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 1);
    assert_eq!(result[0].version, "1.2.0");

    // a range without an identifier is a validation error
    let query = PluginQuery {
        version: Some(">=1.0.0,<2.0.0".to_string()),
        ..PluginQuery::default()
    };
    assert!(plugins.list(&query, &PageRequest::default()).await.is_err());

    // a single version is an equality filter
    let query = PluginQuery {
        version: Some("2.0.0".to_string()),
        ..PluginQuery::default()
    };
    let (info, _) = plugins.list(&query, &PageRequest::default()).await.unwrap();
    assert_eq!(info.collection_size, 1);
}
