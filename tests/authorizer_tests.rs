//! Custom authorizers: import by name.

mod common;

use common::{context, gw_path, provider};
use otc_apigw::apigw::authorizer::AuthorizerResource;
use otc_apigw::{ApigwError, Resource};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn authorizer(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "type": "FRONTEND",
        "authorizer_type": "FUNC",
        "authorizer_uri": format!("urn:fss:eu-de:p1:function:default:{}", name),
        "need_body": false,
        "ttl": 60,
        "identities": [{"name": "X-Token", "location": "HEADER", "validation": ""}],
        "create_time": "2026-03-10T10:00:00Z"
    })
}

#[tokio::test]
async fn test_import_matches_name_exactly() {
    let server = MockServer::start().await;
    // The name filter also returns authorizers whose names merely start with it.
    Mock::given(method("GET"))
        .and(path(gw_path("authorizers")))
        .and(query_param("name", "auth_func"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizers": [authorizer("auth-2", "auth_func_v2"), authorizer("auth-1", "auth_func")]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = assert_ok!(
        provider
            .resource(AuthorizerResource::TYPE_NAME)
            .unwrap()
            .import(&ctx, "gw/auth_func")
            .await
    );
    assert_eq!(state["id"], "gw/auth-1");
    assert_eq!(state["spec"]["name"], "auth_func");
    assert_eq!(state["spec"]["cache_age"], 60);
    assert!(state["spec"]["identities"][0].get("validation").is_none());
}

#[tokio::test]
async fn test_import_without_exact_match_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("authorizers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizers": [authorizer("auth-2", "auth_func_v2")]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let err = assert_err!(
        provider
            .resource(AuthorizerResource::TYPE_NAME)
            .unwrap()
            .import(&ctx, "gw/auth_func")
            .await
    );
    assert!(matches!(err, ApigwError::NotFound { .. }), "got {:?}", err);
}
