//! Groups with their environment variables, environments and custom
//! responses.

mod common;

use common::{bodies, calls, context, gw_path, provider};
use otc_apigw::apigw::environment::EnvironmentResource;
use otc_apigw::apigw::group::GroupResource;
use otc_apigw::apigw::response::ResponseResource;
use otc_apigw::{ApigwError, Plan, Resource};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn group(host: &str) -> Value {
    json!({
        "gateway_id": "gw",
        "name": "group_test",
        "description": "orders",
        "environments": {
            "env-1": [
                {"name": "host", "value": host},
                {"name": "port", "value": "80"}
            ]
        }
    })
}

fn variables(host_id: &str, host: &str) -> Value {
    json!({
        "variables": [
            {"id": host_id, "group_id": "grp-1", "env_id": "env-1",
             "variable_name": "host", "variable_value": host},
            {"id": "var-port", "group_id": "grp-1", "env_id": "env-1",
             "variable_name": "port", "variable_value": "80"}
        ]
    })
}

#[tokio::test]
async fn test_changed_variable_is_deleted_then_recreated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("api-groups/grp-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "grp-1",
            "name": "group_test",
            "remark": "orders",
            "register_time": "2026-03-01T10:00:00Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("env-variables")))
        .and(query_param("group_id", "grp-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(variables("var-a", "a.internal")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("env-variables")))
        .respond_with(ResponseTemplate::new(200).set_body_json(variables("var-b", "b.internal")))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(gw_path("env-variables/var-a")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(gw_path("env-variables")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "var-b", "group_id": "grp-1", "env_id": "env-1",
            "variable_name": "host", "variable_value": "b.internal"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(GroupResource::TYPE_NAME).unwrap();
    let prior = json!({"id": "gw/grp-1", "spec": group("a.internal"), "observed": {}});

    assert_eq!(assert_ok!(resource.plan(Some(&prior), &group("b.internal"))), Plan::Update);
    let state = assert_ok!(resource.apply(&ctx, Some(&prior), &group("b.internal")).await);
    assert_eq!(state["spec"], group("b.internal"));

    let created = bodies(&server, "POST", &gw_path("env-variables")).await;
    assert_eq!(
        created[0],
        json!({"group_id": "grp-1", "env_id": "env-1", "variable_name": "host", "variable_value": "b.internal"})
    );

    // Untouched name and description: the group itself is not updated.
    let mutations: Vec<String> = calls(&server)
        .await
        .into_iter()
        .filter(|(m, _)| m != "GET")
        .map(|(m, _)| m)
        .collect();
    assert_eq!(mutations, vec!["DELETE", "POST"]);
}

#[tokio::test]
async fn test_environment_import_picks_exact_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("envs")))
        .and(query_param("name", "DEV"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "envs": [
                {"id": "env-2", "name": "DEV_EU", "create_time": "2026-03-01T10:00:00Z"},
                {"id": "env-1", "name": "DEV", "remark": "development"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(EnvironmentResource::TYPE_NAME).unwrap();

    let state = assert_ok!(resource.import(&ctx, "gw/DEV").await);
    assert_eq!(state["id"], "gw/DEV");
    assert_eq!(state["observed"]["environment_id"], "env-1");
    assert_eq!(state["spec"]["description"], "development");

    let err = assert_err!(resource.import(&ctx, "gw/DEV_US").await);
    assert!(matches!(err, ApigwError::NotFound { .. }), "got {:?}", err);
}

fn response_spec() -> Value {
    json!({
        "gateway_id": "gw",
        "group_id": "grp-1",
        "name": "response_test",
        "rules": {
            "AUTH_FAILURE": {"body": "{\"error\":\"denied\"}", "status_code": 401}
        }
    })
}

fn response_detail() -> Value {
    json!({
        "id": "resp-1",
        "name": "response_test",
        "responses": {
            "AUTH_FAILURE": {"body": "{\"error\":\"denied\"}", "status": 401, "default": false},
            "DEFAULT_4XX": {"body": "{\"error_msg\":\"$context.error.message\"}", "status": 400, "default": true},
            "DEFAULT_5XX": {"body": "{\"error_msg\":\"$context.error.message\"}", "status": 500, "default": true}
        },
        "create_time": "2026-03-02T10:00:00Z"
    })
}

#[tokio::test]
async fn test_response_defaults_stay_out_of_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("api-groups/grp-1/gateway-responses")))
        .respond_with(ResponseTemplate::new(201).set_body_json(response_detail()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("api-groups/grp-1/gateway-responses/resp-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_detail()))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(ResponseResource::TYPE_NAME).unwrap();

    let created = assert_ok!(resource.apply(&ctx, None, &response_spec()).await);
    assert_eq!(created["id"], "gw/grp-1/response_test");
    assert_eq!(created["spec"]["rules"], response_spec()["rules"]);

    let refreshed = assert_ok!(resource.read(&ctx, &created).await).unwrap();
    assert!(refreshed["spec"]["rules"].get("DEFAULT_4XX").is_none());
    assert_eq!(assert_ok!(resource.plan(Some(&refreshed), &response_spec())), Plan::NoOp);

    let body = &bodies(&server, "POST", &gw_path("api-groups/grp-1/gateway-responses")).await[0];
    assert_eq!(body["responses"]["AUTH_FAILURE"], json!({"body": "{\"error\":\"denied\"}", "status": 401}));
}
