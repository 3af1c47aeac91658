//! Identity-directory and provisioning-target adapter contracts plus the
//! Google Workspace and SCIM 2.0 implementations.

pub mod google;
pub mod mapper;
pub mod scim;

use async_trait::async_trait;
use idpscim_core::{Group, GroupPatch, Member, User};
use idpscim_storage::FetchError;
use thiserror::Error;

pub use google::{GoogleDirectoryClient, GoogleDirectoryConfig};
pub use scim::ScimClient;

pub const CRATE_NAME: &str = "idpscim-adapters";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decoding directory response for {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid directory record: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource conflict: {0}")]
    Conflict(String),
    #[error("provisioning API returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("provisioning transport failed: {0}")]
    Transport(FetchError),
    #[error("decoding provisioning response for {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("provisioning response for {0} carried no id")]
    MissingId(String),
}

impl From<FetchError> for ProvisioningError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status: 404, body, .. } => Self::NotFound(body),
            FetchError::HttpStatus { status: 409, body, .. } => Self::Conflict(body),
            FetchError::HttpStatus { status, body, .. } => Self::Status {
                status,
                detail: body,
            },
            other => Self::Transport(other),
        }
    }
}

impl ProvisioningError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A record that already exists on the provisioning target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResource {
    pub scimid: String,
    pub external_id: Option<String>,
    /// Display name for groups, user name for users.
    pub name: String,
}

/// Read-only view of the upstream identity directory.
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    /// Groups matching one directory query expression, or all groups for `None`.
    async fn list_groups(&self, filter: Option<&str>) -> Result<Vec<Group>, DirectoryError>;

    async fn list_users(&self, filter: Option<&str>) -> Result<Vec<User>, DirectoryError>;

    /// Direct user members of a group; nested groups are not expanded.
    async fn list_group_members(&self, group_ipid: &str) -> Result<Vec<Member>, DirectoryError>;

    async fn get_user(&self, ipid: &str) -> Result<User, DirectoryError>;
}

/// Write access to the provisioning target.
#[async_trait]
pub trait ProvisioningAdapter: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<TargetResource>, ProvisioningError>;
    async fn list_users(&self) -> Result<Vec<TargetResource>, ProvisioningError>;

    /// Returns the target-assigned id.
    async fn create_group(&self, group: &Group) -> Result<String, ProvisioningError>;
    async fn replace_group(&self, group: &Group) -> Result<(), ProvisioningError>;
    async fn patch_group(&self, patch: &GroupPatch) -> Result<(), ProvisioningError>;
    async fn delete_group(&self, group: &Group) -> Result<(), ProvisioningError>;

    /// Returns the target-assigned id.
    async fn create_user(&self, user: &User) -> Result<String, ProvisioningError>;
    async fn replace_user(&self, user: &User) -> Result<(), ProvisioningError>;
    async fn delete_user(&self, user: &User) -> Result<(), ProvisioningError>;
}
