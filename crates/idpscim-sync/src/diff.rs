//! Three-way comparison of the prior snapshot against the freshly fetched one.

use std::collections::{HashMap, HashSet};

use idpscim_core::{Group, GroupMembers, Member, Resource, State, User};

/// Per-kind change set keyed by `ipid`.
///
/// `create` and `update` hold the current version; `delete` holds the prior
/// version so its `scimid` is still available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    pub create: Vec<T>,
    pub update: Vec<T>,
    pub delete: Vec<T>,
    pub unchanged: Vec<T>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

pub fn diff_resources<T: Resource + Clone>(prior: &[T], current: &[T]) -> Delta<T> {
    let prior_by_id: HashMap<&str, &T> = prior.iter().map(|r| (r.ipid(), r)).collect();
    let current_ids: HashSet<&str> = current.iter().map(|r| r.ipid()).collect();

    let mut delta = Delta::default();
    for resource in current {
        match prior_by_id.get(resource.ipid()) {
            None => delta.create.push(resource.clone()),
            Some(previous) if previous.fingerprint() == resource.fingerprint() => {
                delta.unchanged.push(resource.clone())
            }
            Some(_) => delta.update.push(resource.clone()),
        }
    }
    delta.delete = prior
        .iter()
        .filter(|r| !current_ids.contains(r.ipid()))
        .cloned()
        .collect();
    delta
}

/// Members to add to and remove from one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub group: Group,
    pub add: Vec<Member>,
    pub remove: Vec<Member>,
}

/// Compare memberships per group. Groups only present in `prior` yield a
/// removal of every prior member; the caller decides whether to send it.
pub fn diff_memberships(prior: &[GroupMembers], current: &[GroupMembers]) -> Vec<MembershipChange> {
    let prior_by_group: HashMap<&str, &GroupMembers> =
        prior.iter().map(|gm| (gm.group.ipid.as_str(), gm)).collect();
    let current_groups: HashSet<&str> = current.iter().map(|gm| gm.group.ipid.as_str()).collect();

    let mut changes = Vec::new();
    for gm in current {
        let change = match prior_by_group.get(gm.group.ipid.as_str()) {
            Some(previous) if previous.fingerprint == gm.fingerprint => continue,
            Some(previous) => {
                let before = previous.member_ids();
                let after = gm.member_ids();
                MembershipChange {
                    group: gm.group.clone(),
                    add: gm
                        .members
                        .iter()
                        .filter(|m| !before.contains(m.ipid.as_str()))
                        .cloned()
                        .collect(),
                    remove: previous
                        .members
                        .iter()
                        .filter(|m| !after.contains(m.ipid.as_str()))
                        .cloned()
                        .collect(),
                }
            }
            None => MembershipChange {
                group: gm.group.clone(),
                add: gm.members.clone(),
                remove: Vec::new(),
            },
        };
        if !change.add.is_empty() || !change.remove.is_empty() {
            changes.push(change);
        }
    }

    for gm in prior {
        if !current_groups.contains(gm.group.ipid.as_str()) && !gm.members.is_empty() {
            changes.push(MembershipChange {
                group: gm.group.clone(),
                add: Vec::new(),
                remove: gm.members.clone(),
            });
        }
    }
    changes
}

/// Everything the apply phase has to do for one run.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub groups: Delta<Group>,
    pub users: Delta<User>,
    pub memberships: Vec<MembershipChange>,
}

impl Plan {
    pub fn build(prior: &State, current: &State) -> Self {
        Self {
            groups: diff_resources(&prior.groups.resources, &current.groups.resources),
            users: diff_resources(&prior.users.resources, &current.users.resources),
            memberships: diff_memberships(
                &prior.group_members.resources,
                &current.group_members.resources,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty() && self.memberships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idpscim_core::Email;

    fn user(ipid: &str, display: &str) -> User {
        User::new(
            ipid,
            format!("{ipid}@example.com"),
            display,
            true,
            vec![Email::primary(format!("{ipid}@example.com"))],
        )
    }

    fn ids<T: Resource>(items: &[T]) -> Vec<&str> {
        items.iter().map(|r| r.ipid()).collect()
    }

    #[test]
    fn three_way_diff_classifies_by_id_and_fingerprint() {
        let mut prior_b = user("b", "Bea");
        prior_b.scimid = "scim-b".into();
        let mut prior_a = user("a", "Ann");
        prior_a.scimid = "scim-a".into();
        let prior = vec![prior_a, prior_b];
        let current = vec![user("b", "Beatrice"), user("c", "Cy")];

        let delta = diff_resources(&prior, &current);
        assert_eq!(ids(&delta.create), vec!["c"]);
        assert_eq!(ids(&delta.update), vec!["b"]);
        assert_eq!(ids(&delta.delete), vec!["a"]);
        assert_eq!(delta.delete[0].scimid, "scim-a");
        assert!(delta.unchanged.is_empty());
    }

    #[test]
    fn identical_inputs_are_unchanged() {
        let users = vec![user("a", "Ann"), user("b", "Bea")];
        let delta = diff_resources(&users, &users);
        assert!(delta.is_empty());
        assert_eq!(delta.unchanged.len(), 2);
    }

    #[test]
    fn membership_diff_reports_additions_and_removals() {
        let group = Group::new("g1", "Eng", None);
        let prior = vec![GroupMembers::new(
            group.clone(),
            vec![user("a", "Ann").as_member(), user("b", "Bea").as_member()],
        )];
        let current = vec![GroupMembers::new(
            group,
            vec![user("b", "Bea").as_member(), user("c", "Cy").as_member()],
        )];

        let changes = diff_memberships(&prior, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(ids_of(&changes[0].add), vec!["c"]);
        assert_eq!(ids_of(&changes[0].remove), vec!["a"]);
    }

    #[test]
    fn empty_memberships_produce_no_changes() {
        let group = Group::new("g1", "Eng", None);
        let prior = vec![GroupMembers::new(group.clone(), vec![])];
        let current = vec![GroupMembers::new(group.clone(), vec![])];
        assert!(diff_memberships(&prior, &current).is_empty());
        assert!(diff_memberships(&[], &[GroupMembers::new(group, vec![])]).is_empty());
    }

    #[test]
    fn vanished_group_yields_full_removal() {
        let prior = vec![GroupMembers::new(
            Group::new("g1", "Eng", None),
            vec![user("a", "Ann").as_member()],
        )];
        let changes = diff_memberships(&prior, &[]);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].add.is_empty());
        assert_eq!(ids_of(&changes[0].remove), vec!["a"]);
    }

    fn ids_of(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.ipid.as_str()).collect()
    }
}
