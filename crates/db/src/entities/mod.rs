//! Database entities.

pub mod group;
pub mod group_member;
pub mod permission;
pub mod user;

pub use group::Entity as Group;
pub use group_member::Entity as GroupMember;
pub use permission::Entity as Permission;
pub use user::Entity as User;
