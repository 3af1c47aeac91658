//! SCIM 2.0 provisioning client (RFC 7644).

use std::sync::Arc;

use async_trait::async_trait;
use idpscim_core::patch::PATCH_OP_SCHEMA;
use idpscim_core::{Group, GroupPatch, PatchOp, User};
use idpscim_storage::{FetchedResponse, HttpFetcher};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mapper::{scim_group_body, scim_user_body, target_from_scim};
use crate::{ProvisioningAdapter, ProvisioningError, TargetResource};

pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const ENTERPRISE_USER_SCHEMA: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";

const SCIM_CONTENT_TYPE: &str = "application/scim+json";
const LIST_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroupBody {
    pub schemas: Vec<String>,
    pub external_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub honorific_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub honorific_suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScimEmail {
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScimPhoneNumber {
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScimManager {
    pub value: String,
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimEnterpriseUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<ScimManager>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUserBody {
    pub schemas: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub external_id: String,
    pub user_name: String,
    pub display_name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<ScimName>,
    pub emails: Vec<ScimEmail>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<ScimAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phone_numbers: Vec<ScimPhoneNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        rename = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User",
        skip_serializing_if = "Option::is_none"
    )]
    pub enterprise: Option<ScimEnterpriseUser>,
}

/// The subset of a returned Group or User resource the reconciler reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    total_results: usize,
    #[serde(rename = "Resources", default)]
    resources: Vec<ScimResource>,
}

#[derive(Debug)]
pub struct ScimClient {
    http: Arc<HttpFetcher>,
    base_url: String,
    token: String,
}

impl ScimClient {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B: Serialize + Sync>(
        &self,
        label: &str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<FetchedResponse, ProvisioningError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "scim request");
        let resp = self
            .http
            .execute(label, |client| {
                let mut builder = client
                    .request(method.clone(), &url)
                    .bearer_auth(&self.token)
                    .header(ACCEPT, SCIM_CONTENT_TYPE)
                    .query(query);
                if let Some(body) = body {
                    // serde_json::to_vec on plain data structs does not fail.
                    let bytes = serde_json::to_vec(body).unwrap_or_default();
                    builder = builder.header(CONTENT_TYPE, SCIM_CONTENT_TYPE).body(bytes);
                }
                builder
            })
            .await?;
        Ok(resp)
    }

    fn parse_resource(label: &str, resp: &FetchedResponse) -> Result<ScimResource, ProvisioningError> {
        serde_json::from_slice(&resp.body).map_err(|source| ProvisioningError::Decode {
            what: label.to_string(),
            source,
        })
    }

    async fn list_all(&self, resource_path: &str) -> Result<Vec<ScimResource>, ProvisioningError> {
        let label = format!("list {resource_path}");
        let mut out = Vec::new();
        let mut start_index = 1usize;
        loop {
            let query = [
                ("startIndex", start_index.to_string()),
                ("count", LIST_PAGE_SIZE.to_string()),
            ];
            let resp = self
                .send::<()>(&label, Method::GET, resource_path, &query, None)
                .await?;
            let page: ListResponse =
                serde_json::from_slice(&resp.body).map_err(|source| ProvisioningError::Decode {
                    what: label.clone(),
                    source,
                })?;
            let fetched = page.resources.len();
            out.extend(page.resources);
            if fetched == 0 || out.len() >= page.total_results {
                break;
            }
            start_index += fetched;
        }
        Ok(out)
    }

    async fn create(
        &self,
        label: &str,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<String, ProvisioningError> {
        let resp = self.send(label, Method::POST, path, &[], Some(body)).await?;
        let created = Self::parse_resource(label, &resp)?;
        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProvisioningError::MissingId(label.to_string()))
    }
}

#[async_trait]
impl ProvisioningAdapter for ScimClient {
    async fn list_groups(&self) -> Result<Vec<TargetResource>, ProvisioningError> {
        let resources = self.list_all("/Groups").await?;
        Ok(resources
            .into_iter()
            .filter_map(|r| {
                let name = r.display_name.clone();
                target_from_scim(r, name)
            })
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<TargetResource>, ProvisioningError> {
        let resources = self.list_all("/Users").await?;
        Ok(resources
            .into_iter()
            .filter_map(|r| {
                let name = r.user_name.clone();
                target_from_scim(r, name)
            })
            .collect())
    }

    async fn create_group(&self, group: &Group) -> Result<String, ProvisioningError> {
        let id = self
            .create("create group", "/Groups", &scim_group_body(group))
            .await?;
        info!(group = %group.display_name, scimid = %id, "created group");
        Ok(id)
    }

    /// Uses a PATCH `replace` so existing memberships on the target are untouched.
    async fn replace_group(&self, group: &Group) -> Result<(), ProvisioningError> {
        let body = scim_group_body(group);
        let patch = serde_json::json!({
            "schemas": [PATCH_OP_SCHEMA],
            "Operations": [{
                "op": PatchOp::Replace,
                "value": {
                    "displayName": body.display_name,
                    "externalId": body.external_id,
                }
            }]
        });
        let path = format!("/Groups/{}", group.scimid);
        self.send("replace group", Method::PATCH, &path, &[], Some(&patch))
            .await?;
        info!(group = %group.display_name, scimid = %group.scimid, "updated group");
        Ok(())
    }

    async fn patch_group(&self, patch: &GroupPatch) -> Result<(), ProvisioningError> {
        let path = format!("/Groups/{}", patch.group.scimid);
        self.send("patch group members", Method::PATCH, &path, &[], Some(&patch.request))
            .await?;
        debug!(
            group = %patch.group.display_name,
            members = patch.member_count(),
            "patched group members"
        );
        Ok(())
    }

    async fn delete_group(&self, group: &Group) -> Result<(), ProvisioningError> {
        let path = format!("/Groups/{}", group.scimid);
        self.send::<()>("delete group", Method::DELETE, &path, &[], None)
            .await?;
        info!(group = %group.display_name, scimid = %group.scimid, "deleted group");
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<String, ProvisioningError> {
        let id = self
            .create("create user", "/Users", &scim_user_body(user))
            .await?;
        info!(user = %user.user_name, scimid = %id, "created user");
        Ok(id)
    }

    async fn replace_user(&self, user: &User) -> Result<(), ProvisioningError> {
        let path = format!("/Users/{}", user.scimid);
        self.send("replace user", Method::PUT, &path, &[], Some(&scim_user_body(user)))
            .await?;
        info!(user = %user.user_name, scimid = %user.scimid, "replaced user");
        Ok(())
    }

    async fn delete_user(&self, user: &User) -> Result<(), ProvisioningError> {
        let path = format!("/Users/{}", user.scimid);
        self.send::<()>("delete user", Method::DELETE, &path, &[], None)
            .await?;
        info!(user = %user.user_name, scimid = %user.scimid, "deleted user");
        Ok(())
    }
}
