use poem::http::StatusCode;
use poem::test::TestClient;
use test_r::test;

use plugin_registry_service::api;

use crate::all::{TestEnv, plugin_insert, test_env};

fn client(env: &TestEnv) -> TestClient<poem::Route> {
    TestClient::new(api::combined_routes(&env.services, &env.config))
}

#[test]
async fn the_root_resource_advertises_the_sub_resources() {
    let env = test_env().await;
    let client = client(&env);

    let response = client.get("/api/").send().await;
    response.assert_status_is_ok();
    let json = response.json().await;
    let body = json.value().object();
    assert_eq!(body.get("data").object().get("title").string(), "Plugin Registry API");
    let links = body.get("links").array();
    assert!(links.len() >= 6);
    let keyed_links = body.get("keyedLinks").array();
    assert!(keyed_links.len() >= 3);
}

#[test]
async fn the_plugin_page_envelope_has_the_cursor_page_shape() {
    let env = test_env().await;
    env.services
        .plugin_repo
        .create(&plugin_insert("k-means", "1.0.0", &["clustering"]))
        .await
        .unwrap();
    let client = client(&env);

    let response = client.get("/api/plugins/").send().await;
    response.assert_status_is_ok();
    let json = response.json().await;
    let body = json.value().object();
    let data = body.get("data").object();
    assert_eq!(data.get("collectionSize").i64(), 1);
    assert_eq!(data.get("page").i64(), 1);
    assert_eq!(data.get("items").array().len(), 1);
    assert_eq!(body.get("embedded").array().len(), 1);
}

#[test]
async fn malformed_cursors_and_plugin_ids_are_rejected() {
    let env = test_env().await;
    let client = client(&env);

    let response = client.get("/api/plugins/?cursor=abc").send().await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = client.get("/api/plugins/?plugin-id=1,x").send().await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[test]
async fn seeds_conflict_on_duplicate_urls() {
    let env = test_env().await;
    let client = client(&env);

    let body = serde_json::json!({"url": "http://plugins.test/runner"});
    let response = client.post("/api/seeds/").body_json(&body).send().await;
    response.assert_status_is_ok();

    let response = client.post("/api/seeds/").body_json(&body).send().await;
    response.assert_status(StatusCode::CONFLICT);
}

#[test]
async fn env_entries_can_be_created_updated_and_deleted() {
    let env = test_env().await;
    let client = client(&env);

    let body = serde_json::json!({"name": "BACKEND_URL", "value": "http://backend"});
    let response = client.post("/api/env/").body_json(&body).send().await;
    response.assert_status_is_ok();

    let response = client
        .put("/api/env/BACKEND_URL/")
        .body_json(&serde_json::json!({"value": "http://other-backend"}))
        .send()
        .await;
    response.assert_status_is_ok();

    let response = client.get("/api/env/BACKEND_URL/").send().await;
    response.assert_status_is_ok();
    let json = response.json().await;
    assert_eq!(
        json.value().object().get("data").object().get("value").string(),
        "http://other-backend"
    );

    let response = client.delete("/api/env/BACKEND_URL/").send().await;
    response.assert_status_is_ok();

    let response = client.get("/api/env/BACKEND_URL/").send().await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[test]
async fn tabs_with_malformed_filters_are_rejected_with_400() {
    let env = test_env().await;
    let client = client(&env);

    let response = client
        .post("/api/templates/")
        .body_json(&serde_json::json!({"name": "default", "description": "", "tags": []}))
        .send()
        .await;
    response.assert_status_is_ok();
    let template = env
        .services
        .template_repo
        .get_template_by_name("default")
        .await
        .unwrap()
        .unwrap();

    let response = client
        .post(format!("/api/templates/{}/tabs/", template.id))
        .body_json(&serde_json::json!({
            "name": "broken",
            "filterString": "{\"version\": \"not-a-spec\"}"
        }))
        .send()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    // no tab row was created
    assert!(
        env.services
            .template_repo
            .all_tabs()
            .await
            .unwrap()
            .is_empty()
    );
}

#[test]
async fn unknown_plugins_yield_404() {
    let env = test_env().await;
    let client = client(&env);

    let response = client.get("/api/plugins/12345/").send().await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[test]
async fn the_plugin_page_filters_by_template_tab() {
    let env = test_env().await;
    let repo = &env.services.plugin_repo;
    let clustering = repo
        .create(&plugin_insert("k-means", "1.0.0", &["clustering"]))
        .await
        .unwrap();
    repo.create(&plugin_insert("csv-loader", "1.0.0", &["data-loading"]))
        .await
        .unwrap();

    let template = env
        .services
        .templates
        .create_template("default".to_string(), String::new(), vec![])
        .await
        .unwrap();
    let tab = env
        .services
        .templates
        .create_tab(
            template.id,
            plugin_registry_service::service::templates::TabParams {
                name: "clustering".to_string(),
                description: String::new(),
                sort_key: 0,
                location: "workspace".to_string(),
                icon: None,
                group_key: None,
                filter_string: r#"{"tag": "clustering"}"#.to_string(),
            },
        )
        .await
        .unwrap();

    let client = client(&env);
    let response = client
        .get(format!("/api/plugins/?template-tab={}", tab.id))
        .send()
        .await;
    response.assert_status_is_ok();
    let json = response.json().await;
    let data = json.value().object().get("data").object();
    assert_eq!(data.get("collectionSize").i64(), 1);

    // the single matching plugin is the clustering one
    let response = client.get(format!("/api/plugins/{clustering}/")).send().await;
    response.assert_status_is_ok();
    let json = response.json().await;
    assert_eq!(
        json.value().object().get("data").object().get("identifier").string(),
        "k-means"
    );
}
