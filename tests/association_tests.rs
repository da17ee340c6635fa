//! Policy bindings: throttling set updates, signature binding polling and
//! ACL import.

mod common;

use common::{bodies, calls, context, gw_path, provider};
use otc_apigw::apigw::association::{AclAssociation, SignatureAssociation, ThrottlingAssociation};
use otc_apigw::{ApigwError, Resource};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn spec(policy_id: &str, publish_ids: &[&str]) -> Value {
    json!({
        "gateway_id": "gw",
        "policy_id": policy_id,
        "publish_ids": publish_ids
    })
}

fn throttle_bound(entries: &[(&str, &str)]) -> Value {
    let apis: Vec<Value> = entries
        .iter()
        .map(|(publish_id, bind_id)| json!({"publish_id": publish_id, "throttle_apply_id": bind_id}))
        .collect();
    json!({ "apis": apis })
}

#[tokio::test]
async fn test_throttling_update_unbinds_then_binds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("throttle-bindings/binded-apis")))
        .and(query_param("throttle_id", "tp-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(throttle_bound(&[
            ("pub-a", "bind-a"),
            ("pub-b", "bind-b"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("throttle-bindings/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(throttle_bound(&[
            ("pub-b", "bind-b"),
            ("pub-c", "bind-c"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(gw_path("throttle-bindings/bind-a")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(gw_path("throttle-bindings")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"throttle_applys": []})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(ThrottlingAssociation::TYPE_NAME).unwrap();

    let prior = json!({
        "id": "gw/tp-1",
        "spec": spec("tp-1", &["pub-a", "pub-b"]),
        "observed": null
    });
    let state = resource
        .apply(&ctx, Some(&prior), &spec("tp-1", &["pub-b", "pub-c"]))
        .await
        .unwrap();
    assert_eq!(state["spec"]["publish_ids"], json!(["pub-b", "pub-c"]));

    let bound = bodies(&server, "POST", &gw_path("throttle-bindings")).await;
    assert_eq!(bound[0], json!({"strategy_id": "tp-1", "publish_ids": ["pub-c"]}));

    let mutations: Vec<String> = calls(&server)
        .await
        .into_iter()
        .filter(|(m, _)| m != "GET")
        .map(|(m, _)| m)
        .collect();
    assert_eq!(mutations, vec!["DELETE", "POST"]);
}

#[tokio::test]
async fn test_signature_binding_waits_until_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("sign-bindings")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"bindings": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("sign-bindings/unbinded-apis")))
        .and(query_param("sign_id", "sig-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apis": [{"publish_id": "pub-a"}]})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("sign-bindings/unbinded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apis": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("sign-bindings/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bindings": [{"publish_id": "pub-a", "binding_id": "sb-1"}]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = provider
        .resource(SignatureAssociation::TYPE_NAME)
        .unwrap()
        .apply(&ctx, None, &spec("sig-1", &["pub-a"]))
        .await
        .unwrap();
    assert_eq!(state["id"], "gw/sig-1");

    let bound = bodies(&server, "POST", &gw_path("sign-bindings")).await;
    assert_eq!(bound[0]["sign_id"], "sig-1");

    let polls = calls(&server)
        .await
        .into_iter()
        .filter(|(_, p)| p.ends_with("/unbinded-apis"))
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn test_acl_binding_does_not_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(gw_path("acl-bindings")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"acl_bindings": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(gw_path("acl-bindings/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apis": [{"publish_id": "pub-a", "bind_id": "ab-1"}]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    provider
        .resource(AclAssociation::TYPE_NAME)
        .unwrap()
        .apply(&ctx, None, &spec("acl-1", &["pub-a"]))
        .await
        .unwrap();

    assert!(calls(&server)
        .await
        .iter()
        .all(|(_, p)| !p.ends_with("/unbinded-apis")));
    let bound = bodies(&server, "POST", &gw_path("acl-bindings")).await;
    assert_eq!(bound[0]["acl_id"], "acl-1");
}

#[tokio::test]
async fn test_import_reads_bound_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("acl-bindings/binded-apis")))
        .and(query_param("acl_id", "acl-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apis": [
                {"publish_id": "pub-b", "bind_id": "ab-2"},
                {"publish_id": "pub-a", "bind_id": "ab-1"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let state = provider
        .resource(AclAssociation::TYPE_NAME)
        .unwrap()
        .import(&ctx, "gw/acl-1")
        .await
        .unwrap();
    assert_eq!(state["spec"]["publish_ids"], json!(["pub-a", "pub-b"]));
}

#[tokio::test]
async fn test_empty_binding_reads_as_gone_and_fails_import() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gw_path("acl-bindings/binded-apis")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apis": []})))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let ctx = context(&provider);
    let resource = provider.resource(AclAssociation::TYPE_NAME).unwrap();

    let state = json!({"id": "gw/acl-1", "spec": spec("acl-1", &["pub-a"]), "observed": null});
    assert!(resource.read(&ctx, &state).await.unwrap().is_none());

    let err = resource.import(&ctx, "gw/acl-1").await.unwrap_err();
    assert!(matches!(err, ApigwError::NotFound { .. }), "got {:?}", err);
}
