//! Business logic services.

#![allow(missing_docs)]

pub mod access;
pub mod group;
pub mod membership;
pub mod permission;

pub use access::{AccessService, BestAccess, ResourceCheck};
pub use group::{
    CreateGroupInput, GroupDetails, GroupService, MemberEntry, PermissionEntry, UpdateGroupInput,
};
pub use membership::{GrantMembershipInput, MembershipService};
pub use permission::{GrantPermissionInput, PermissionService};
