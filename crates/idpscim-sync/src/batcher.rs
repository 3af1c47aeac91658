//! Split a group's member changes into PATCH requests the target will accept.

use idpscim_core::{GroupPatch, GroupRef, Member, MemberValue, PatchOp, PatchOperation, PatchRequest};

/// Largest member list the target accepts in one PATCH operation.
pub const MAX_MEMBERS_PER_PATCH: usize = 100;

/// Produce `ceil(N / max)` patches addressed to `group`, each carrying one
/// `members` operation with at most `max` values, in input order.
///
/// `max` is clamped to at least 1. An empty `members` slice yields no patches.
pub fn batch_member_patches(
    group: &GroupRef,
    op: PatchOp,
    members: &[Member],
    max: usize,
) -> Vec<GroupPatch> {
    members
        .chunks(max.max(1))
        .map(|chunk| GroupPatch {
            group: group.clone(),
            request: PatchRequest::single(PatchOperation {
                op,
                path: "members".to_string(),
                value: chunk
                    .iter()
                    .map(|member| MemberValue::new(member.scimid.clone()))
                    .collect(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use idpscim_core::patch::PATCH_OP_SCHEMA;

    fn group() -> GroupRef {
        GroupRef {
            scimid: "scim-g1".into(),
            display_name: "Engineering".into(),
        }
    }

    fn members(n: usize) -> Vec<Member> {
        (0..n)
            .map(|i| Member {
                ipid: format!("u{i:04}"),
                scimid: format!("scim-u{i:04}"),
                user_name: format!("user{i}@example.com"),
            })
            .collect()
    }

    fn values(patches: &[GroupPatch]) -> Vec<String> {
        patches
            .iter()
            .flat_map(|p| p.request.operations.iter())
            .flat_map(|op| op.value.iter().map(|v| v.value.clone()))
            .collect()
    }

    #[test]
    fn single_member_fits_one_patch() {
        let patches = batch_member_patches(&group(), PatchOp::Add, &members(1), MAX_MEMBERS_PER_PATCH);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].member_count(), 1);
        assert_eq!(patches[0].request.schemas, vec![PATCH_OP_SCHEMA.to_string()]);
        assert_eq!(patches[0].request.operations[0].path, "members");
    }

    #[test]
    fn hundred_twenty_members_split_into_hundred_and_twenty() {
        let input = members(120);
        let patches = batch_member_patches(&group(), PatchOp::Remove, &input, MAX_MEMBERS_PER_PATCH);
        let sizes: Vec<_> = patches.iter().map(GroupPatch::member_count).collect();
        assert_eq!(sizes, vec![100, 20]);
        assert!(patches.iter().all(|p| p.group == group()));
        assert!(patches
            .iter()
            .all(|p| p.request.operations.iter().all(|op| op.op == PatchOp::Remove)));

        let expected: Vec<_> = input.iter().map(|m| m.scimid.clone()).collect();
        assert_eq!(values(&patches), expected);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let patches = batch_member_patches(&group(), PatchOp::Add, &members(200), 100);
        assert_eq!(patches.len(), 2);
        assert!(patches.iter().all(|p| p.member_count() == 100));
    }

    #[test]
    fn no_members_means_no_patches() {
        assert!(batch_member_patches(&group(), PatchOp::Add, &[], MAX_MEMBERS_PER_PATCH).is_empty());
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let patches = batch_member_patches(&group(), PatchOp::Add, &members(3), 0);
        assert_eq!(patches.len(), 3);
        assert!(patches.iter().all(|p| p.member_count() == 1));
    }
}
