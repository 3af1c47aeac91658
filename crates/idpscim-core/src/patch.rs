//! SCIM PATCH envelope (RFC 7644 section 3.5.2) for group membership changes.

use serde::{Deserialize, Serialize};

pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl std::fmt::Display for PatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

/// A single `{"value": "<scim id>"}` member reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberValue {
    pub value: String,
}

impl MemberValue {
    pub fn new(scimid: impl Into<String>) -> Self {
        Self {
            value: scimid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Vec<MemberValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    pub fn single(operation: PatchOperation) -> Self {
        Self {
            schemas: vec![PATCH_OP_SCHEMA.to_string()],
            operations: vec![operation],
        }
    }
}

/// Target-side address of a group: provisioning id plus display name for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub scimid: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPatch {
    pub group: GroupRef,
    pub request: PatchRequest,
}

impl GroupPatch {
    pub fn member_count(&self) -> usize {
        self.request.operations.iter().map(|op| op.value.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_in_scim_shape() {
        let request = PatchRequest::single(PatchOperation {
            op: PatchOp::Add,
            path: "members".into(),
            value: vec![MemberValue::new("u-1"), MemberValue::new("u-2")],
        });
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                "Operations": [{
                    "op": "add",
                    "path": "members",
                    "value": [{"value": "u-1"}, {"value": "u-2"}]
                }]
            })
        );
    }
}
