//! Core domain model, fingerprinting and snapshot types for idpscim.

pub mod fingerprint;
pub mod model;
pub mod patch;
pub mod state;

pub use fingerprint::{sha256_hex, Fingerprint};
pub use model::{
    Address, Email, EnterpriseData, Group, GroupMembers, Manager, Member, ModelError, Name,
    PhoneNumber, Resource, User,
};
pub use patch::{GroupPatch, GroupRef, MemberValue, PatchOp, PatchOperation, PatchRequest};
pub use state::{Collection, State, STATE_SCHEMA_VERSION};

pub const CRATE_NAME: &str = "idpscim-core";
