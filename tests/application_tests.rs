//! Applications, their app codes and API authorizations.

mod common;

use common::{bodies, calls, context, gw_path, provider};
use otc_apigw::apigw::app_auth::AppAuthResource;
use otc_apigw::apigw::application::ApplicationResource;
use otc_apigw::Resource;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn code(tag: char) -> String {
    format!("{}{}", tag, "k".repeat(70))
}

fn application(codes: &[String]) -> Value {
    json!({
        "gateway_id": "gw",
        "name": "billing_app",
        "description": "billing consumer",
        "app_codes": codes
    })
}

fn code_list(entries: &[(&str, &String)]) -> Value {
    let codes: Vec<Value> = entries
        .iter()
        .map(|(id, value)| json!({"id": id, "app_code": value}))
        .collect();
    json!({ "app_codes": codes, "total": codes.len() })
}

async fn mount_application(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(gw_path("apps/app-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "app-1",
            "name": "billing_app",
            "remark": "billing consumer",
            "app_key": "key-1",
            "app_secret": "secret-1",
            "register_time": "2026-04-01T12:00:00Z"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_app_code_swap_deletes_by_server_id() {
    let (a, b, c) = (code('A'), code('B'), code('C'));
    let server = MockServer::start().await;
    mount_application(&server).await;
    Mock::given(method("GET"))
        .and(path(gw_path("apps/app-1/app-codes")))
        .respond_with(ResponseTemplate::new(200).set_body_json(code_list(&[("code-a", &a), ("code-b", &b)])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("apps/app-1/app-codes")))
        .respond_with(ResponseTemplate::new(200).set_body_json(code_list(&[("code-b", &b), ("code-c", &c)])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(gw_path("apps/app-1/app-codes/code-a")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(gw_path("apps/app-1/app-codes")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "code-c", "app_code": c})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let prior = json!({
        "id": "gw/app-1",
        "spec": application(&[a.clone(), b.clone()]),
        "observed": {"app_key": "key-1", "app_secret": "secret-1"}
    });

    let state = provider
        .resource(ApplicationResource::TYPE_NAME)
        .unwrap()
        .apply(&ctx, Some(&prior), &application(&[b.clone(), c.clone()]))
        .await
        .unwrap();

    let mut expected = vec![b, c.clone()];
    expected.sort();
    assert_eq!(state["spec"]["app_codes"], json!(expected));
    assert_eq!(state["observed"]["app_key"], "key-1");

    let created = bodies(&server, "POST", &gw_path("apps/app-1/app-codes")).await;
    assert_eq!(created[0], json!({"app_code": c}));
    // The application itself was not touched.
    assert!(calls(&server).await.iter().all(|(m, p)| !(m == "PUT" && p.ends_with("/apps/app-1"))));
}

#[tokio::test]
async fn test_secret_reset_is_write_only() {
    let server = MockServer::start().await;
    mount_application(&server).await;
    Mock::given(method("GET"))
        .and(path(gw_path("apps/app-1/app-codes")))
        .respond_with(ResponseTemplate::new(200).set_body_json(code_list(&[])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(gw_path("apps/secret/app-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"app_secret": "rotated"})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let prior = json!({
        "id": "gw/app-1",
        "spec": application(&[]),
        "observed": {"app_key": "key-1", "app_secret": "secret-1"}
    });
    let mut desired = application(&[]);
    desired["secret_action"] = "RESET".into();

    let state = provider
        .resource(ApplicationResource::TYPE_NAME)
        .unwrap()
        .apply(&ctx, Some(&prior), &desired)
        .await
        .unwrap();
    assert_eq!(state["spec"]["secret_action"], "RESET");
}

fn authorization(api_ids: &[&str]) -> Value {
    json!({
        "gateway_id": "gw",
        "environment_id": "env-1",
        "application_id": "app-1",
        "api_ids": api_ids
    })
}

#[tokio::test]
async fn test_authorization_polls_until_apis_are_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("app-auths")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"auths": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("app-auths/unbinded-apis")))
        .and(query_param("app_id", "app-1"))
        .and(query_param("env_id", "env-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apis": [{"id": "api-1"}]})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("app-auths/unbinded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apis": [{"id": "api-9"}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("app-auths/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auths": [{"id": "auth-1", "api_id": "api-1"}]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = provider
        .resource(AppAuthResource::TYPE_NAME)
        .unwrap()
        .apply(&ctx, None, &authorization(&["api-1"]))
        .await
        .unwrap();
    assert_eq!(state["id"], "gw/env-1/app-1");
    assert_eq!(state["spec"]["api_ids"], json!(["api-1"]));

    let body = &bodies(&server, "POST", &gw_path("app-auths")).await[0];
    assert_eq!(body["env_id"], "env-1");
    assert_eq!(body["app_ids"], json!(["app-1"]));
    assert_eq!(body["api_ids"], json!(["api-1"]));
}

#[tokio::test]
async fn test_unauthorize_waits_until_unbound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("app-auths/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auths": [{"id": "auth-1", "api_id": "api-1"}]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("app-auths/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auths": []})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(gw_path("app-auths/auth-1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = json!({"id": "gw/env-1/app-1", "spec": authorization(&["api-1"]), "observed": null});
    provider
        .resource(AppAuthResource::TYPE_NAME)
        .unwrap()
        .delete(&ctx, &state)
        .await
        .unwrap();

    let lookups = calls(&server)
        .await
        .into_iter()
        .filter(|(_, p)| p.ends_with("/binded-apis"))
        .count();
    assert_eq!(lookups, 3);
}
