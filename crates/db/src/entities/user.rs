//! User entity.
//!
//! Identity management lives elsewhere; this table only carries what the
//! access-control engine needs: a stable id, the site-wide role, and the
//! bearer token used to resolve callers.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Site-wide role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum UserRole {
    /// Regular user.
    #[sea_orm(string_value = "user")]
    User,
    /// Site administrator. Bypasses every group-derived check.
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

impl UserRole {
    /// Check if this is the site-admin role.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Display name.
    pub name: String,

    /// Email address (optional).
    #[sea_orm(unique, nullable)]
    pub email: Option<String>,

    /// Site-wide role.
    pub site_role: UserRole,

    /// Access token for API authentication.
    #[sea_orm(unique, nullable)]
    pub token: Option<String>,

    /// When the user was created.
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::group_member::Entity")]
    Memberships,
}

impl Related<super::group_member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
