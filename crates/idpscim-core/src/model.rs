//! Directory entities as the reconciler sees them.
//!
//! `ipid` is the identity-provider id and never changes for an entity.
//! `scimid` is assigned by the provisioning target and stays empty until the
//! first successful create.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{kind} has an empty identity-provider id")]
    EmptyIpid { kind: &'static str },
    #[error("duplicate {kind} id {ipid}")]
    DuplicateIpid { kind: &'static str, ipid: String },
    #[error("user {ipid} must have exactly one primary email, found {primary_count}")]
    PrimaryEmail { ipid: String, primary_count: usize },
    #[error("group {group} references member {member} missing from the users collection")]
    DanglingMember { group: String, member: String },
}

/// Anything keyed by an identity-provider id that carries a content fingerprint.
pub trait Resource: Fingerprint {
    const KIND: &'static str;

    fn ipid(&self) -> &str;
    fn scimid(&self) -> &str;
    fn set_scimid(&mut self, scimid: String);
    fn fingerprint(&self) -> &str;
    fn set_fingerprint(&mut self, fingerprint: String);

    /// Recompute and store the fingerprint from the current content.
    fn refresh_fingerprint(&mut self) {
        let fingerprint = self.compute_fingerprint();
        self.set_fingerprint(fingerprint);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Email {
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

impl Email {
    pub fn primary(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: Some("work".to_string()),
            primary: true,
        }
    }

    pub fn secondary(value: impl Into<String>, kind: Option<String>) -> Self {
        Self {
            value: value.into(),
            kind,
            primary: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honorific_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honorific_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Manager {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<Manager>,
}

impl EnterpriseData {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub ipid: String,
    #[serde(default)]
    pub scimid: String,
    pub user_name: String,
    pub display_name: String,
    pub active: bool,
    pub emails: Vec<Email>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Name>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_numbers: Vec<PhoneNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<EnterpriseData>,
    #[serde(default)]
    pub fingerprint: String,
}

impl User {
    pub fn new(
        ipid: impl Into<String>,
        user_name: impl Into<String>,
        display_name: impl Into<String>,
        active: bool,
        emails: Vec<Email>,
    ) -> Self {
        let mut user = Self {
            ipid: ipid.into(),
            scimid: String::new(),
            user_name: user_name.into(),
            display_name: display_name.into(),
            active,
            emails,
            name: None,
            addresses: Vec::new(),
            phone_numbers: Vec::new(),
            title: None,
            enterprise: None,
            fingerprint: String::new(),
        };
        user.refresh_fingerprint();
        user
    }

    pub fn primary_email(&self) -> Option<&Email> {
        self.emails.iter().find(|email| email.primary)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.ipid.trim().is_empty() {
            return Err(ModelError::EmptyIpid { kind: Self::KIND });
        }
        let primary_count = self.emails.iter().filter(|email| email.primary).count();
        if primary_count != 1 {
            return Err(ModelError::PrimaryEmail {
                ipid: self.ipid.clone(),
                primary_count,
            });
        }
        Ok(())
    }

    pub fn as_member(&self) -> Member {
        Member {
            ipid: self.ipid.clone(),
            scimid: self.scimid.clone(),
            user_name: self.user_name.clone(),
        }
    }
}

impl Resource for User {
    const KIND: &'static str = "user";

    fn ipid(&self) -> &str {
        &self.ipid
    }

    fn scimid(&self) -> &str {
        &self.scimid
    }

    fn set_scimid(&mut self, scimid: String) {
        self.scimid = scimid;
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn set_fingerprint(&mut self, fingerprint: String) {
        self.fingerprint = fingerprint;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub ipid: String,
    #[serde(default)]
    pub scimid: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub fingerprint: String,
}

impl Group {
    pub fn new(
        ipid: impl Into<String>,
        display_name: impl Into<String>,
        email: Option<String>,
    ) -> Self {
        let mut group = Self {
            ipid: ipid.into(),
            scimid: String::new(),
            display_name: display_name.into(),
            email,
            fingerprint: String::new(),
        };
        group.refresh_fingerprint();
        group
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.ipid.trim().is_empty() {
            return Err(ModelError::EmptyIpid { kind: Self::KIND });
        }
        Ok(())
    }
}

impl Resource for Group {
    const KIND: &'static str = "group";

    fn ipid(&self) -> &str {
        &self.ipid
    }

    fn scimid(&self) -> &str {
        &self.scimid
    }

    fn set_scimid(&mut self, scimid: String) {
        self.scimid = scimid;
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn set_fingerprint(&mut self, fingerprint: String) {
        self.fingerprint = fingerprint;
    }
}

/// Reference from a group to one of its member users.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub ipid: String,
    #[serde(default)]
    pub scimid: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembers {
    pub group: Group,
    pub members: Vec<Member>,
    #[serde(default)]
    pub fingerprint: String,
}

impl GroupMembers {
    /// Members are kept sorted by `ipid` so patch batches come out in a stable order.
    pub fn new(group: Group, mut members: Vec<Member>) -> Self {
        members.sort_by(|a, b| a.ipid.cmp(&b.ipid));
        members.dedup_by(|a, b| a.ipid == b.ipid);
        let mut group_members = Self {
            group,
            members,
            fingerprint: String::new(),
        };
        group_members.refresh_fingerprint();
        group_members
    }

    pub fn member_ids(&self) -> HashSet<&str> {
        self.members.iter().map(|m| m.ipid.as_str()).collect()
    }
}

impl Resource for GroupMembers {
    const KIND: &'static str = "group membership";

    fn ipid(&self) -> &str {
        &self.group.ipid
    }

    fn scimid(&self) -> &str {
        &self.group.scimid
    }

    fn set_scimid(&mut self, scimid: String) {
        self.group.scimid = scimid;
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn set_fingerprint(&mut self, fingerprint: String) {
        self.fingerprint = fingerprint;
    }
}

/// Reject empty or repeated ids within one collection.
pub fn ensure_unique_ipids<R: Resource>(resources: &[R]) -> Result<(), ModelError> {
    let mut seen = HashSet::with_capacity(resources.len());
    for resource in resources {
        if resource.ipid().trim().is_empty() {
            return Err(ModelError::EmptyIpid { kind: R::KIND });
        }
        if !seen.insert(resource.ipid()) {
            return Err(ModelError::DuplicateIpid {
                kind: R::KIND,
                ipid: resource.ipid().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_requires_exactly_one_primary_email() {
        let mut user = User::new("u1", "ana@example.com", "Ana", true, vec![]);
        assert_eq!(
            user.validate(),
            Err(ModelError::PrimaryEmail {
                ipid: "u1".into(),
                primary_count: 0
            })
        );

        user.emails = vec![
            Email::primary("ana@example.com"),
            Email::primary("ana@other.example.com"),
        ];
        assert!(matches!(
            user.validate(),
            Err(ModelError::PrimaryEmail { primary_count: 2, .. })
        ));

        user.emails.truncate(1);
        assert!(user.validate().is_ok());
    }

    #[test]
    fn empty_ipid_is_rejected() {
        let group = Group::new("  ", "Admins", None);
        assert_eq!(group.validate(), Err(ModelError::EmptyIpid { kind: "group" }));
    }

    #[test]
    fn duplicate_ipids_are_rejected() {
        let groups = vec![
            Group::new("g1", "Admins", None),
            Group::new("g1", "Admins again", None),
        ];
        assert_eq!(
            ensure_unique_ipids(&groups),
            Err(ModelError::DuplicateIpid {
                kind: "group",
                ipid: "g1".into()
            })
        );
    }

    #[test]
    fn group_members_are_sorted_and_deduplicated() {
        let member = |id: &str| Member {
            ipid: id.into(),
            scimid: String::new(),
            user_name: format!("{id}@example.com"),
        };
        let gm = GroupMembers::new(
            Group::new("g1", "Admins", None),
            vec![member("u3"), member("u1"), member("u3"), member("u2")],
        );
        let ids: Vec<_> = gm.members.iter().map(|m| m.ipid.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
    }
}
