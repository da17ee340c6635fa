//! APIs: request body mapping, read-back of parameters and import by name.

mod common;

use common::{bodies, calls, context, gw_path, provider};
use otc_apigw::apigw::api::ApiResource;
use otc_apigw::{ApigwError, Plan, Resource};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TYPE: &str = ApiResource::TYPE_NAME;

fn spec() -> Value {
    json!({
        "gateway_id": "gw",
        "group_id": "grp-1",
        "name": "get_order",
        "request_method": "GET",
        "request_uri": "/orders/{id}",
        "description": "order lookup",
        "mock": {"result_content": "{\"ok\":true}"},
        "request_params": [
            {"name": "id", "location": "PATH", "required": true, "maximum": 32, "minimum": 1},
            {"name": "page", "location": "QUERY", "type": "NUMBER", "default": "1", "maximum": 100}
        ],
        "backend_params": [
            {"type": "SYSTEM", "name": "X-Source", "location": "HEADER", "value": "sourceIp", "system_param_type": "internal"},
            {"type": "CONSTANT", "name": "X-Tenant", "location": "HEADER", "value": "billing"}
        ]
    })
}

/// What the service returns for the API above
fn detail() -> Value {
    json!({
        "id": "api-1",
        "group_id": "grp-1",
        "name": "get_order",
        "type": 1,
        "req_protocol": "HTTPS",
        "req_method": "GET",
        "req_uri": "/orders/{id}",
        "auth_type": "NONE",
        "match_mode": "NORMAL",
        "cors": false,
        "remark": "order lookup",
        "backend_type": "MOCK",
        "mock_info": {"result_content": "{\"ok\":true}", "id": "mock-1"},
        "req_params": [
            {"name": "page", "type": "NUMBER", "location": "QUERY", "default_value": "1",
             "required": 2, "valid_enable": 2, "pass_through": 2, "max_num": 100, "id": "rp-2"},
            {"name": "id", "type": "STRING", "location": "PATH", "required": 1,
             "valid_enable": 2, "pass_through": 2, "min_size": 1, "max_size": 32, "id": "rp-1"}
        ],
        "backend_params": [
            {"name": "X-Tenant", "location": "HEADER", "origin": "CONSTANT", "value": "billing", "id": "bp-2"},
            {"name": "X-Source", "location": "HEADER", "origin": "SYSTEM", "value": "$context.sourceIp", "id": "bp-1"}
        ],
        "publish_id": "pub-1|pub-2",
        "run_env_id": "env-1|env-2",
        "register_time": "2026-05-01T08:00:00Z",
        "update_time": "2026-05-02T08:00:00Z"
    })
}

async fn mount_detail(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(gw_path("apis/api-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_maps_params_and_reads_back_without_drift() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("apis")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "api-1", "name": "get_order"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_detail(&server).await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(TYPE).unwrap();

    let state = resource.apply(&ctx, None, &spec()).await.unwrap();
    assert_eq!(state["id"], "gw/api-1");
    assert_eq!(state["observed"]["publications"]["env-2"], "pub-2");
    assert_eq!(resource.plan(Some(&state), &spec()).unwrap(), Plan::NoOp);

    let body = &bodies(&server, "POST", &gw_path("apis")).await[0];
    assert_eq!(body["backend_type"], "MOCK");
    assert_eq!(body["mock_info"]["result_content"], "{\"ok\":true}");
    assert!(body.get("auth_opt").is_none());
    assert!(body.get("backend_api").is_none());

    let params = body["req_params"].as_array().unwrap();
    let id_param = params.iter().find(|p| p["name"] == "id").unwrap();
    assert_eq!(id_param["required"], 1);
    assert_eq!(id_param["max_size"], 32);
    let page_param = params.iter().find(|p| p["name"] == "page").unwrap();
    assert_eq!(page_param["required"], 2);
    assert_eq!(page_param["max_num"], 100);

    let backend = body["backend_params"].as_array().unwrap();
    let source = backend.iter().find(|p| p["name"] == "X-Source").unwrap();
    assert_eq!(source["origin"], "SYSTEM");
    assert_eq!(source["value"], "$context.sourceIp");
}

#[tokio::test]
async fn test_second_default_backend_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let provider = provider(&server);
    let ctx = context(&provider);

    let mut invalid = spec();
    invalid["func_graph"] = json!({"function_urn": "urn:fss:eu-de:p1:function:default:order", "version": "latest"});
    let err = provider
        .resource(TYPE)
        .unwrap()
        .apply(&ctx, None, &invalid)
        .await
        .unwrap_err();
    assert!(matches!(err, ApigwError::Validation { .. }), "got {:?}", err);
    assert!(calls(&server).await.is_empty());
}

#[tokio::test]
async fn test_import_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis")))
        .and(query_param("name", "get_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apis": [
                {"id": "api-0", "name": "get_order_v0"},
                {"id": "api-1", "name": "get_order"}
            ]
        })))
        .mount(&server)
        .await;
    mount_detail(&server).await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = provider
        .resource(TYPE)
        .unwrap()
        .import(&ctx, "gw/get_order")
        .await
        .unwrap();
    assert_eq!(state["id"], "gw/api-1");
    assert_eq!(state["spec"]["mock"]["result_content"], "{\"ok\":true}");
    assert_eq!(state["spec"]["request_params"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_import_rejects_ambiguous_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apis": [
                {"id": "api-1", "name": "get_order"},
                {"id": "api-2", "name": "get_order"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let err = provider
        .resource(TYPE)
        .unwrap()
        .import(&ctx, "gw/get_order")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("more than one"));
}

#[tokio::test]
async fn test_delete_tolerates_missing_api() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(gw_path("apis/api-1")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error_code": "APIG.3002",
            "error_msg": "The API does not exist"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = json!({"id": "gw/api-1", "spec": spec(), "observed": {}});
    provider.resource(TYPE).unwrap().delete(&ctx, &state).await.unwrap();
}
