//! Google Workspace Admin SDK Directory API client.

use std::sync::Arc;

use async_trait::async_trait;
use idpscim_core::{Group, Member, User};
use idpscim_storage::HttpFetcher;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::mapper::{group_from_directory, member_from_directory, user_from_directory};
use crate::{DirectoryAdapter, DirectoryError};

const PAGE_SIZE: &str = "200";

#[derive(Debug, Clone)]
pub struct GoogleDirectoryConfig {
    pub base_url: String,
    /// Customer id, `my_customer` for the caller's own account.
    pub customer: String,
    /// OAuth access token with the directory read-only scopes.
    pub access_token: String,
}

impl GoogleDirectoryConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://admin.googleapis.com";
    pub const DEFAULT_CUSTOMER: &'static str = "my_customer";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryGroup {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMember {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl DirectoryMember {
    pub fn is_user(&self) -> bool {
        self.kind
            .as_deref()
            .map(|kind| kind.eq_ignore_ascii_case("USER"))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUserName {
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEmail {
    pub address: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryAddress {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub formatted: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryPhone {
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryOrganization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryTypedValue {
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    pub primary_email: String,
    #[serde(default)]
    pub name: Option<DirectoryUserName>,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub emails: Vec<DirectoryEmail>,
    #[serde(default)]
    pub addresses: Vec<DirectoryAddress>,
    #[serde(default)]
    pub phones: Vec<DirectoryPhone>,
    #[serde(default)]
    pub organizations: Vec<DirectoryOrganization>,
    #[serde(default)]
    pub external_ids: Vec<DirectoryTypedValue>,
    #[serde(default)]
    pub relations: Vec<DirectoryTypedValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsPage {
    #[serde(default)]
    groups: Vec<DirectoryGroup>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersPage {
    #[serde(default)]
    members: Vec<DirectoryMember>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default)]
    users: Vec<DirectoryUser>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug)]
pub struct GoogleDirectoryClient {
    http: Arc<HttpFetcher>,
    config: GoogleDirectoryConfig,
}

impl GoogleDirectoryClient {
    pub fn new(http: Arc<HttpFetcher>, mut config: GoogleDirectoryConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/admin/directory/v1/{}", self.config.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        label: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let resp = self
            .http
            .execute(label, |client| {
                client
                    .get(url)
                    .bearer_auth(&self.config.access_token)
                    .query(query)
            })
            .await?;
        serde_json::from_slice(&resp.body).map_err(|source| DirectoryError::Decode {
            what: label.to_string(),
            source,
        })
    }

    /// Walk `nextPageToken` until exhausted, collecting each page's items.
    async fn paginate<P, T>(
        &self,
        label: &str,
        url: &str,
        base_query: Vec<(&str, String)>,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, DirectoryError>
    where
        P: DeserializeOwned,
    {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = base_query.clone();
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: P = self.get_json(label, url, &query).await?;
            let (items, next) = split(page);
            out.extend(items);
            match next.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DirectoryAdapter for GoogleDirectoryClient {
    async fn list_groups(&self, filter: Option<&str>) -> Result<Vec<Group>, DirectoryError> {
        let mut query = vec![
            ("customer", self.config.customer.clone()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            query.push(("query", filter.to_string()));
        }
        let raw = self
            .paginate("groups.list", &self.url("groups"), query, |page: GroupsPage| {
                (page.groups, page.next_page_token)
            })
            .await?;
        debug!(count = raw.len(), filter, "listed directory groups");
        raw.iter().map(group_from_directory).collect()
    }

    async fn list_users(&self, filter: Option<&str>) -> Result<Vec<User>, DirectoryError> {
        let mut query = vec![
            ("customer", self.config.customer.clone()),
            ("maxResults", "500".to_string()),
            ("projection", "full".to_string()),
        ];
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            query.push(("query", filter.to_string()));
        }
        let raw = self
            .paginate("users.list", &self.url("users"), query, |page: UsersPage| {
                (page.users, page.next_page_token)
            })
            .await?;
        debug!(count = raw.len(), filter, "listed directory users");
        raw.iter().map(user_from_directory).collect()
    }

    async fn list_group_members(&self, group_ipid: &str) -> Result<Vec<Member>, DirectoryError> {
        let url = self.url(&format!("groups/{group_ipid}/members"));
        let query = vec![("maxResults", PAGE_SIZE.to_string())];
        let raw = self
            .paginate("members.list", &url, query, |page: MembersPage| {
                (page.members, page.next_page_token)
            })
            .await?;
        let total = raw.len();
        let members: Vec<Member> = raw
            .iter()
            .filter(|m| m.is_user())
            .map(member_from_directory)
            .collect::<Result<_, _>>()?;
        debug!(group = group_ipid, total, users = members.len(), "listed group members");
        Ok(members)
    }

    async fn get_user(&self, ipid: &str) -> Result<User, DirectoryError> {
        let url = self.url(&format!("users/{ipid}"));
        let raw: DirectoryUser = self
            .get_json("users.get", &url, &[("projection", "full".to_string())])
            .await?;
        user_from_directory(&raw)
    }
}
