//! Persisted snapshot of the last reconciled directory state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{combine, combine_unordered};
use crate::model::{ensure_unique_ipids, Group, GroupMembers, ModelError, Resource, User};

pub const STATE_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection<T> {
    pub items: usize,
    pub fingerprint: String,
    pub resources: Vec<T>,
}

impl<T: Resource> Collection<T> {
    /// Resources are stored sorted by `ipid`. Every fingerprint is recomputed
    /// from content; whatever the caller carried in is discarded.
    pub fn new(mut resources: Vec<T>) -> Self {
        resources.sort_by(|a, b| a.ipid().cmp(b.ipid()));
        for resource in &mut resources {
            resource.refresh_fingerprint();
        }
        let fingerprint = combine_unordered(resources.iter().map(|r| r.fingerprint()));
        Self {
            items: resources.len(),
            fingerprint,
            resources,
        }
    }

    pub fn get(&self, ipid: &str) -> Option<&T> {
        self.resources.iter().find(|r| r.ipid() == ipid)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<T: Resource> Default for Collection<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub schema_version: String,
    pub code_version: String,
    pub last_sync: DateTime<Utc>,
    pub fingerprint: String,
    pub groups: Collection<Group>,
    pub users: Collection<User>,
    pub group_members: Collection<GroupMembers>,
}

impl State {
    pub fn new(groups: Vec<Group>, users: Vec<User>, group_members: Vec<GroupMembers>) -> Self {
        let groups = Collection::new(groups);
        let users = Collection::new(users);
        let group_members = Collection::new(group_members);
        let fingerprint = combine([
            groups.fingerprint.as_str(),
            users.fingerprint.as_str(),
            group_members.fingerprint.as_str(),
        ]);
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            code_version: env!("CARGO_PKG_VERSION").to_string(),
            last_sync: Utc::now(),
            fingerprint,
            groups,
            users,
            group_members,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty() && self.group_members.is_empty()
    }

    /// Check every snapshot invariant: ids, primary emails, members backed by users.
    pub fn validate(&self) -> Result<(), ModelError> {
        ensure_unique_ipids(&self.groups.resources)?;
        ensure_unique_ipids(&self.users.resources)?;
        ensure_unique_ipids(&self.group_members.resources)?;
        for group in &self.groups.resources {
            group.validate()?;
        }
        for user in &self.users.resources {
            user.validate()?;
        }

        let user_ids: HashSet<&str> = self.users.resources.iter().map(|u| u.ipid()).collect();
        for gm in &self.group_members.resources {
            if let Some(missing) = gm.members.iter().find(|m| !user_ids.contains(m.ipid.as_str())) {
                return Err(ModelError::DanglingMember {
                    group: gm.group.ipid.clone(),
                    member: missing.ipid.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let mut state: Self = serde_json::from_slice(bytes)?;
        state.fill_missing_fingerprints();
        Ok(state)
    }

    fn fill_missing_fingerprints(&mut self) {
        let stale = self
            .groups
            .resources
            .iter()
            .any(|r| r.fingerprint.is_empty())
            || self.users.resources.iter().any(|r| r.fingerprint.is_empty())
            || self
                .group_members
                .resources
                .iter()
                .any(|r| r.fingerprint.is_empty());
        if stale {
            let last_sync = self.last_sync;
            let code_version = std::mem::take(&mut self.code_version);
            *self = Self::new(
                std::mem::take(&mut self.groups.resources),
                std::mem::take(&mut self.users.resources),
                std::mem::take(&mut self.group_members.resources),
            );
            self.last_sync = last_sync;
            self.code_version = code_version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Email, Member};

    fn user(id: &str) -> User {
        User::new(
            id,
            format!("{id}@example.com"),
            id.to_uppercase(),
            true,
            vec![Email::primary(format!("{id}@example.com"))],
        )
    }

    fn sample_state() -> State {
        let admins = Group::new("g1", "Admins", None);
        let users = vec![user("u2"), user("u1")];
        let members = GroupMembers::new(
            admins.clone(),
            users.iter().map(User::as_member).collect(),
        );
        State::new(vec![admins], users, vec![members])
    }

    #[test]
    fn fingerprint_ignores_resource_order_and_timestamp() {
        let a = sample_state();
        let mut b = sample_state();
        b.last_sync = a.last_sync - chrono::Duration::days(3);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.users.resources[0].ipid, "u1");
    }

    #[test]
    fn empty_state_is_valid() {
        let state = State::empty();
        assert!(state.is_empty());
        assert!(state.validate().is_ok());
        assert_eq!(state.groups.items, 0);
    }

    #[test]
    fn dangling_members_fail_validation() {
        let admins = Group::new("g1", "Admins", None);
        let ghost = Member {
            ipid: "u9".into(),
            scimid: String::new(),
            user_name: "ghost@example.com".into(),
        };
        let state = State::new(
            vec![admins.clone()],
            vec![user("u1")],
            vec![GroupMembers::new(admins, vec![ghost])],
        );
        assert_eq!(
            state.validate(),
            Err(ModelError::DanglingMember {
                group: "g1".into(),
                member: "u9".into()
            })
        );
    }

    #[test]
    fn json_document_reloads_with_same_fingerprints() {
        let state = sample_state();
        let bytes = state.to_json_bytes().expect("serialize");
        let reloaded = State::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(reloaded, state);
    }

    #[test]
    fn missing_fingerprints_are_recomputed_on_load() {
        let state = sample_state();
        let mut value: serde_json::Value =
            serde_json::from_slice(&state.to_json_bytes().expect("serialize")).expect("json");
        value["users"]["resources"][0]["fingerprint"] = serde_json::Value::String(String::new());
        let bytes = serde_json::to_vec(&value).expect("json bytes");

        let reloaded = State::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(reloaded.fingerprint, state.fingerprint);
        assert_eq!(reloaded.users.resources[0].fingerprint, state.users.resources[0].fingerprint);
    }

    #[test]
    fn carried_fingerprints_are_not_trusted() {
        let fresh = sample_state();
        let mut renamed = user("u1");
        let stale = renamed.fingerprint.clone();
        renamed.display_name = "Renamed".into();

        let state = State::new(vec![], vec![renamed, user("u2")], vec![]);
        assert_ne!(state.users.resources[0].fingerprint, stale);
        assert_ne!(state.users.fingerprint, fresh.users.fingerprint);
    }

    #[test]
    fn lookup_by_ipid() {
        let state = sample_state();
        assert_eq!(state.users.get("u2").map(|u| u.display_name.as_str()), Some("U2"));
        assert!(state.groups.get("missing").is_none());
    }
}
