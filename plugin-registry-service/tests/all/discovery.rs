use poem::Route;
use poem::endpoint::make_sync;
use poem::listener::TcpListener;
use test_r::test;

use crate::all::{plugin_insert, test_env};

fn plugin_description(name: &str, tags: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "version": "1.0.0",
        "title": format!("Plugin {name}"),
        "description": "a test plugin",
        "type": "processing",
        "tags": tags,
        "entryPoint": {
            "href": "./process/",
            "uiHref": "./ui/",
            "dataInput": [
                {
                    "parameter": "data",
                    "dataType": "entity/list",
                    "contentType": ["application/json"],
                    "required": true
                }
            ],
            "dataOutput": [
                {
                    "name": "result",
                    "dataType": "entity/label",
                    "contentType": ["application/json"],
                    "required": true
                }
            ],
            "pluginDependencies": []
        }
    })
}

fn json_endpoint(body: serde_json::Value) -> impl poem::Endpoint {
    make_sync(move |_| poem::web::Json(body.clone()))
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("could not bind");
    listener.local_addr().expect("no local addr").port()
}

/// Serves a plugin runner with two plugins on a local port.
async fn start_runner_stub() -> (String, tokio::task::JoinHandle<()>) {
    let port = free_port();
    let base = format!("http://127.0.0.1:{port}");

    let listing = serde_json::json!({
        "plugins": [
            {"apiRoot": format!("{base}/p1/")},
            {"apiRoot": format!("{base}/p2/")}
        ]
    });
    let routes = Route::new()
        .at("/runner", json_endpoint(serde_json::json!({"runner": true})))
        .at("/runner/plugins", json_endpoint(listing))
        .at("/p1/", json_endpoint(plugin_description("p1", &["clustering"])))
        .at("/p2/", json_endpoint(plugin_description("p2", &["data-loading"])));

    let handle = tokio::spawn(async move {
        let _ = poem::Server::new(TcpListener::bind(format!("127.0.0.1:{port}")))
            .run(routes)
            .await;
    });
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    (base, handle)
}

#[test]
async fn a_runner_seed_discovers_all_listed_plugins() {
    let env = test_env().await;
    let (base, server) = start_runner_stub().await;

    let seed_url = format!("{base}/runner");
    let seed_id = env.services.seed_repo.create(&seed_url).await.unwrap();

    env.services.discovery.clone().discover_all().await;

    let repo = &env.services.plugin_repo;
    assert_eq!(repo.count().await.unwrap(), 2);
    let p1 = repo
        .get_by_identifier_and_version("p1", "1.0.0")
        .await
        .unwrap()
        .expect("p1 was not ingested");
    assert_eq!(p1.seed_id, Some(seed_id));
    assert_eq!(p1.title, "Plugin p1");
    assert_eq!(p1.url, format!("{base}/p1/"));
    assert_eq!(p1.entry_url, format!("{base}/p1/process/"));

    let details = repo
        .details_many(&[p1.id])
        .await
        .unwrap()
        .remove(&p1.id)
        .unwrap();
    assert_eq!(details.tags, vec!["clustering"]);
    assert_eq!(details.data.len(), 2);

    server.abort();
}

#[test]
async fn rediscovery_only_refreshes_the_timestamp() {
    let env = test_env().await;
    let (base, server) = start_runner_stub().await;

    env.services.seed_repo.create(&format!("{base}/runner")).await.unwrap();

    env.services.discovery.clone().discover_all().await;
    let repo = &env.services.plugin_repo;
    let before = repo
        .get_by_identifier_and_version("p1", "1.0.0")
        .await
        .unwrap()
        .unwrap();

    env.services.discovery.clone().discover_all().await;
    assert_eq!(repo.count().await.unwrap(), 2);
    let after = repo
        .get_by_identifier_and_version("p1", "1.0.0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.id, after.id);
    assert!(after.last_available >= before.last_available);

    server.abort();
}

#[test]
async fn new_plugins_are_added_to_matching_tabs() {
    let env = test_env().await;
    let (base, server) = start_runner_stub().await;

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

    env.services.seed_repo.create(&format!("{base}/runner")).await.unwrap();
    env.services.discovery.clone().discover_all().await;

    let p1 = env
        .services
        .plugin_repo
        .get_by_identifier_and_version("p1", "1.0.0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        env.services.templates.tab_plugin_ids(tab.id).await.unwrap(),
        vec![p1.id]
    );

    server.abort();
}

#[test]
async fn missing_plugins_are_deleted_when_requested() {
    let env = test_env().await;
    let (base, server) = start_runner_stub().await;

    let missing_url = format!("{base}/gone/");
    let mut insert = plugin_insert("gone", "1.0.0", &[]);
    insert.url = missing_url.clone();
    env.services.plugin_repo.create(&insert).await.unwrap();

    // without delete_on_missing a 404 leaves the catalog alone
    env.services
        .discovery
        .clone()
        .discover(missing_url.clone(), None, 0, false)
        .await;
    assert_eq!(env.services.plugin_repo.count().await.unwrap(), 1);

    env.services
        .discovery
        .clone()
        .discover(missing_url, None, 0, true)
        .await;
    assert_eq!(env.services.plugin_repo.count().await.unwrap(), 0);

    server.abort();
}

#[test]
async fn unreachable_seeds_do_not_block_other_seeds() {
    let env = test_env().await;
    let (base, server) = start_runner_stub().await;

    let dead_port = free_port();
    env.services
        .seed_repo
        .create(&format!("http://127.0.0.1:{dead_port}/nothing"))
        .await
        .unwrap();
    env.services.seed_repo.create(&format!("{base}/runner")).await.unwrap();

    env.services.discovery.clone().discover_all().await;
    assert_eq!(env.services.plugin_repo.count().await.unwrap(), 2);

    server.abort();
}
