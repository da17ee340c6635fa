//! API publication: publishing, re-publishing with a new description,
//! pinning a historical version, import and offline.

mod common;

use common::{bodies, calls, context, gw_path, provider};
use otc_apigw::apigw::publishment::PublishmentResource;
use otc_apigw::{ApigwError, Resource};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TYPE: &str = PublishmentResource::TYPE_NAME;

fn spec(description: &str) -> Value {
    json!({
        "gateway_id": "gw",
        "environment_id": "env-1",
        "api_id": "api-1",
        "description": description
    })
}

fn versions(entries: &[(&str, &str, i32)]) -> Value {
    let api_versions: Vec<Value> = entries
        .iter()
        .map(|(id, remark, status)| {
            json!({
                "version_id": id,
                "remark": remark,
                "publish_time": "2026-03-01T10:00:00Z",
                "status": status
            })
        })
        .collect();
    json!({ "api_versions": api_versions })
}

async fn mount_api_detail(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(gw_path("apis/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "api-1",
            "name": "get_order",
            "publish_id": "pub-1",
            "run_env_id": "env-1"
        })))
        .mount(server)
        .await;
}

async fn mount_action(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(gw_path("apis/action")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"publish_id": "pub-1"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_publish_then_republish_with_new_description() {
    let server = MockServer::start().await;
    mount_action(&server).await;
    mount_api_detail(&server).await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .and(query_param("env_id", "env-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[("v1", "first", 1)])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 1),
            ("v1", "first", 2),
        ])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(TYPE).unwrap();

    let created = resource.apply(&ctx, None, &spec("first")).await.unwrap();
    assert_eq!(created["id"], "gw/env-1/api-1");
    assert_eq!(created["spec"]["description"], "first");
    assert!(created["spec"].get("version_id").is_none());
    assert_eq!(created["observed"]["publish_id"], "pub-1");

    let updated = resource
        .apply(&ctx, Some(&created), &spec("second"))
        .await
        .unwrap();
    assert_eq!(updated["spec"]["description"], "second");
    assert_eq!(updated["observed"]["history"].as_array().unwrap().len(), 2);

    let actions = bodies(&server, "POST", &gw_path("apis/action")).await;
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0]["action"], "online");
    assert_eq!(actions[0]["remark"], "first");
    assert_eq!(actions[1]["remark"], "second");
    assert_eq!(actions[1]["env_id"], "env-1");
}

#[tokio::test]
async fn test_reused_description_is_a_conflict() {
    let server = MockServer::start().await;
    mount_action(&server).await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 1),
            ("v1", "first", 2),
        ])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let prior = json!({
        "id": "gw/env-1/api-1",
        "spec": spec("second"),
        "observed": {"publish_id": "pub-1", "history": []}
    });

    let err = provider
        .resource(TYPE)
        .unwrap()
        .apply(&ctx, Some(&prior), &spec("first"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApigwError::Conflict { .. }), "got {:?}", err);
    assert!(err.to_string().contains("v1"));
    assert!(bodies(&server, "POST", &gw_path("apis/action")).await.is_empty());
}

#[tokio::test]
async fn test_pinning_switches_to_historical_version() {
    let server = MockServer::start().await;
    mount_api_detail(&server).await;
    Mock::given(method("PUT"))
        .and(path(gw_path("apis/publish/api-1/v1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 1),
            ("v1", "first", 2),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 2),
            ("v1", "first", 1),
        ])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let prior = json!({
        "id": "gw/env-1/api-1",
        "spec": spec("second"),
        "observed": {"publish_id": "pub-1", "history": []}
    });
    let mut desired = spec("first");
    desired["version_id"] = "v1".into();

    let state = provider
        .resource(TYPE)
        .unwrap()
        .apply(&ctx, Some(&prior), &desired)
        .await
        .unwrap();
    assert_eq!(state["spec"]["version_id"], "v1");
    assert_eq!(state["spec"]["description"], "first");
    assert!(bodies(&server, "POST", &gw_path("apis/action")).await.is_empty());
}

#[tokio::test]
async fn test_pinning_rejects_relabelled_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 1),
            ("v1", "first", 2),
        ])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let mut desired = spec("renamed");
    desired["version_id"] = "v1".into();

    let err = provider
        .resource(TYPE)
        .unwrap()
        .apply(&ctx, None, &desired)
        .await
        .unwrap_err();
    assert!(matches!(err, ApigwError::Validation { .. }), "got {:?}", err);
    assert!(calls(&server).await.iter().all(|(m, _)| m == "GET"));
}

#[tokio::test]
async fn test_import_reads_live_version() {
    let server = MockServer::start().await;
    mount_api_detail(&server).await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[
            ("v2", "second", 1),
            ("v1", "first", 2),
        ])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = provider
        .resource(TYPE)
        .unwrap()
        .import(&ctx, "gw/env-1/api-1")
        .await
        .unwrap();

    assert_eq!(state["spec"]["gateway_id"], "gw");
    assert_eq!(state["spec"]["environment_id"], "env-1");
    assert_eq!(state["spec"]["api_id"], "api-1");
    assert_eq!(state["spec"]["description"], "second");
    assert!(state["spec"].get("version_id").is_none());
    assert_eq!(state["observed"]["publish_id"], "pub-1");
}

#[tokio::test]
async fn test_import_rejects_malformed_id() {
    let server = MockServer::start().await;
    let provider = provider(&server);
    let ctx = context(&provider);
    let err = provider
        .resource(TYPE)
        .unwrap()
        .import(&ctx, "gw/api-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApigwError::Validation { .. }), "got {:?}", err);
    assert!(calls(&server).await.is_empty());
}

#[tokio::test]
async fn test_read_without_live_version_is_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis/publish/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions(&[("v1", "first", 2)])))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = json!({
        "id": "gw/env-1/api-1",
        "spec": spec("first"),
        "observed": {"publish_id": "pub-1", "history": []}
    });
    let fresh = provider.resource(TYPE).unwrap().read(&ctx, &state).await.unwrap();
    assert!(fresh.is_none());
}

#[tokio::test]
async fn test_delete_takes_api_offline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("apis/action")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error_code": "APIG.3002",
            "error_msg": "The API does not exist"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = json!({
        "id": "gw/env-1/api-1",
        "spec": spec("first"),
        "observed": {"publish_id": "pub-1", "history": []}
    });
    provider.resource(TYPE).unwrap().delete(&ctx, &state).await.unwrap();

    let actions = bodies(&server, "POST", &gw_path("apis/action")).await;
    assert_eq!(actions[0]["action"], "offline");
    assert!(actions[0].get("remark").is_none());
}
