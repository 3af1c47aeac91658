use std::sync::Arc;
use std::time::Duration;

use idpscim_adapters::{DirectoryAdapter, GoogleDirectoryClient, GoogleDirectoryConfig};
use idpscim_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GoogleDirectoryClient {
    let http = HttpFetcher::new(HttpClientConfig {
        backoff: BackoffPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..Default::default()
    })
    .expect("fetcher");
    GoogleDirectoryClient::new(
        Arc::new(http),
        GoogleDirectoryConfig {
            base_url: server.uri(),
            customer: GoogleDirectoryConfig::DEFAULT_CUSTOMER.to_string(),
            access_token: "token-1".into(),
        },
    )
}

#[tokio::test]
async fn list_groups_follows_page_tokens_and_passes_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/directory/v1/groups"))
        .and(header("authorization", "Bearer token-1"))
        .and(query_param("query", "email:aws-*"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{"id": "g2", "email": "aws-ops@example.com", "name": "AWS Ops"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/directory/v1/groups"))
        .and(query_param("customer", "my_customer"))
        .and(query_param("query", "email:aws-*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{"id": "g1", "email": "aws-dev@example.com", "name": "AWS Dev"}],
            "nextPageToken": "p2"
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let groups = client(&server)
        .list_groups(Some("email:aws-*"))
        .await
        .expect("groups");
    let names: Vec<_> = groups.iter().map(|g| g.display_name.as_str()).collect();
    assert_eq!(names, vec!["AWS Dev", "AWS Ops"]);
    assert!(groups.iter().all(|g| !g.fingerprint.is_empty()));
}

#[tokio::test]
async fn group_members_keep_only_users() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/directory/v1/groups/g1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [
                {"id": "u1", "email": "ana@example.com", "type": "USER", "status": "ACTIVE"},
                {"id": "g9", "email": "nested@example.com", "type": "GROUP"},
                {"id": "c1", "email": "everyone@example.com", "type": "CUSTOMER"},
                {"id": "u2", "email": "bo@example.com", "type": "USER"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let members = client(&server)
        .list_group_members("g1")
        .await
        .expect("members");
    let ids: Vec<_> = members.iter().map(|m| m.ipid.as_str()).collect();
    assert_eq!(ids, vec!["u1", "u2"]);
    assert_eq!(members[0].user_name, "ana@example.com");
}

#[tokio::test]
async fn get_user_maps_full_projection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/directory/v1/users/u1"))
        .and(query_param("projection", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "primaryEmail": "ana@example.com",
            "name": {"givenName": "Ana", "familyName": "Lima", "fullName": "Ana Lima"},
            "suspended": true,
            "emails": [{"address": "ana@example.com", "primary": true}],
            "phones": [{"value": "+1 555 0100", "type": "work"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = client(&server).get_user("u1").await.expect("user");
    assert_eq!(user.user_name, "ana@example.com");
    assert_eq!(user.display_name, "Ana Lima");
    assert!(!user.active);
    assert_eq!(user.phone_numbers.len(), 1);
}

#[tokio::test]
async fn directory_errors_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .list_users(None)
        .await
        .expect_err("forbidden");
    assert!(err.to_string().contains("403"));
}
