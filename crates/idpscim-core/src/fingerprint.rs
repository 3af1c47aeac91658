//! Deterministic content fingerprints.
//!
//! A fingerprint is the hex SHA-256 of a canonical JSON view of an entity. The
//! view leaves out everything the provisioning target assigns (`scimid`) and
//! the stored fingerprint itself, and sorts every multi-valued attribute so
//! that construction order never changes the result.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{Group, GroupMembers, User};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn hash_view<T: Serialize>(view: &T) -> String {
    // Serializing plain structs of strings/bools/vecs cannot fail.
    let bytes = serde_json::to_vec(view).unwrap_or_default();
    sha256_hex(&bytes)
}

/// Hash an already-ordered list of fingerprints into one aggregate value.
pub fn combine<'a>(fingerprints: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for fingerprint in fingerprints {
        hasher.update(fingerprint.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Hash a collection of fingerprints independently of their order.
pub fn combine_unordered<'a>(fingerprints: impl IntoIterator<Item = &'a str>) -> String {
    let mut sorted: Vec<&str> = fingerprints.into_iter().collect();
    sorted.sort_unstable();
    combine(sorted)
}

pub trait Fingerprint {
    fn compute_fingerprint(&self) -> String;
}

impl Fingerprint for User {
    fn compute_fingerprint(&self) -> String {
        let mut view = self.clone();
        view.scimid.clear();
        view.fingerprint.clear();
        view.emails.sort();
        view.addresses.sort();
        view.phone_numbers.sort();
        hash_view(&view)
    }
}

#[derive(Serialize)]
struct GroupView<'a> {
    ipid: &'a str,
    display_name: &'a str,
    email: Option<&'a str>,
}

impl Fingerprint for Group {
    fn compute_fingerprint(&self) -> String {
        hash_view(&GroupView {
            ipid: &self.ipid,
            display_name: &self.display_name,
            email: self.email.as_deref(),
        })
    }
}

#[derive(Serialize)]
struct GroupMembersView<'a> {
    group: &'a str,
    members: Vec<&'a str>,
}

impl Fingerprint for GroupMembers {
    fn compute_fingerprint(&self) -> String {
        let mut members: Vec<&str> = self.members.iter().map(|m| m.ipid.as_str()).collect();
        members.sort_unstable();
        members.dedup();
        hash_view(&GroupMembersView {
            group: &self.group.ipid,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Email, Member, PhoneNumber, Resource};

    fn sample_user() -> User {
        let mut user = User::new(
            "103",
            "ana@example.com",
            "Ana Lima",
            true,
            vec![
                Email::primary("ana@example.com"),
                Email::secondary("ana.lima@example.com", Some("home".into())),
            ],
        );
        user.phone_numbers = vec![
            PhoneNumber {
                value: "+1 555 0100".into(),
                kind: Some("work".into()),
            },
            PhoneNumber {
                value: "+1 555 0199".into(),
                kind: Some("mobile".into()),
            },
        ];
        user.addresses = vec![Address {
            locality: Some("Lisbon".into()),
            ..Default::default()
        }];
        user.refresh_fingerprint();
        user
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn repeated_calls_agree() {
        let user = sample_user();
        assert_eq!(user.compute_fingerprint(), user.compute_fingerprint());
        assert_eq!(user.fingerprint, user.compute_fingerprint());
    }

    #[test]
    fn construction_order_does_not_matter() {
        let a = sample_user();
        let mut b = sample_user();
        b.emails.reverse();
        b.phone_numbers.reverse();
        b.refresh_fingerprint();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn provisioning_id_is_ignored() {
        let a = sample_user();
        let mut b = sample_user();
        b.scimid = "9f1c-scim".into();
        assert_eq!(a.compute_fingerprint(), b.compute_fingerprint());

        let mut g = Group::new("g1", "Admins", Some("admins@example.com".into()));
        let before = g.compute_fingerprint();
        g.scimid = "abc".into();
        assert_eq!(before, g.compute_fingerprint());
    }

    #[test]
    fn content_changes_are_detected() {
        let a = sample_user();
        let mut b = sample_user();
        b.active = false;
        assert_ne!(a.fingerprint, b.compute_fingerprint());

        let g = Group::new("g1", "Admins", None);
        let renamed = Group::new("g1", "Administrators", None);
        assert_ne!(g.fingerprint, renamed.fingerprint);
    }

    #[test]
    fn membership_fingerprint_ignores_member_order_and_ids() {
        let member = |id: &str, scimid: &str| Member {
            ipid: id.into(),
            scimid: scimid.into(),
            user_name: format!("{id}@example.com"),
        };
        let group = Group::new("g1", "Admins", None);
        let a = GroupMembers::new(group.clone(), vec![member("u1", ""), member("u2", "")]);
        let mut b = GroupMembers {
            group: group.clone(),
            members: vec![member("u2", "s2"), member("u1", "s1")],
            fingerprint: String::new(),
        };
        b.refresh_fingerprint();
        assert_eq!(a.fingerprint, b.fingerprint);

        let c = GroupMembers::new(group, vec![member("u1", "")]);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn unordered_combination_is_order_independent() {
        assert_eq!(
            combine_unordered(["b", "a", "c"]),
            combine_unordered(["c", "b", "a"])
        );
        assert_ne!(combine(["a", "b"]), combine(["b", "a"]));
    }
}
