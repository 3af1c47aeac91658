use std::sync::Arc;
use std::time::Duration;

use idpscim_adapters::{ProvisioningAdapter, ProvisioningError, ScimClient};
use idpscim_core::{
    Email, Group, GroupPatch, GroupRef, MemberValue, PatchOp, PatchOperation, PatchRequest, User,
};
use idpscim_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ScimClient {
    let http = HttpFetcher::new(HttpClientConfig {
        backoff: BackoffPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..Default::default()
    })
    .expect("fetcher");
    ScimClient::new(Arc::new(http), format!("{}/scim/v2/", server.uri()), "scim-token")
}

fn ana() -> User {
    User::new(
        "u1",
        "ana@example.com",
        "Ana",
        true,
        vec![Email::primary("ana@example.com")],
    )
}

#[tokio::test]
async fn create_group_returns_target_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/scim/v2/Groups"))
        .and(header("authorization", "Bearer scim-token"))
        .and(header("content-type", "application/scim+json"))
        .and(body_partial_json(json!({"externalId": "g1", "displayName": "Admins"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "scim-g1"})))
        .expect(1)
        .mount(&server)
        .await;

    let group = Group::new("g1", "Admins", None);
    let id = client(&server).create_group(&group).await.expect("created");
    assert_eq!(id, "scim-g1");
}

#[tokio::test]
async fn create_without_id_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/scim/v2/Users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    let user = ana();
    let err = client(&server).create_user(&user).await.expect_err("no id");
    assert!(matches!(err, ProvisioningError::MissingId(_)));
}

#[tokio::test]
async fn patch_group_sends_member_envelope() {
    let server = MockServer::start().await;
    let patch = GroupPatch {
        group: GroupRef {
            scimid: "scim-g1".into(),
            display_name: "Admins".into(),
        },
        request: PatchRequest::single(PatchOperation {
            op: PatchOp::Add,
            path: "members".into(),
            value: vec![MemberValue::new("scim-u1")],
        }),
    };
    Mock::given(method("PATCH"))
        .and(path("/scim/v2/Groups/scim-g1"))
        .and(body_json(json!({
            "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
            "Operations": [{"op": "add", "path": "members", "value": [{"value": "scim-u1"}]}]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).patch_group(&patch).await.expect("patched");
}

#[tokio::test]
async fn list_users_pages_by_start_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scim/v2/Users"))
        .and(query_param("startIndex", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalResults": 2,
            "Resources": [{"id": "s1", "externalId": "u1", "userName": "ana@example.com"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scim/v2/Users"))
        .and(query_param("startIndex", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalResults": 2,
            "Resources": [{"id": "s2", "userName": "bo@example.com"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let users = client(&server).list_users().await.expect("users");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].external_id.as_deref(), Some("u1"));
    assert_eq!(users[1].name, "bo@example.com");
    assert_eq!(users[1].external_id, None);
}

#[tokio::test]
async fn delete_of_missing_user_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/scim/v2/Users/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut user = ana();
    user.scimid = "gone".into();
    let err = client(&server).delete_user(&user).await.expect_err("404");
    assert!(err.is_not_found());
}
