//! Group member entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Role of a group member.
///
/// Roles form a strict privilege order: `Member < Admin < Owner`. Every group
/// has exactly one permanent `Owner` membership; ownership moves only through
/// the dedicated transfer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum GroupRole {
    /// Regular member.
    #[sea_orm(string_value = "member")]
    Member,
    /// Admin - manages members and group settings.
    #[sea_orm(string_value = "admin")]
    Admin,
    /// Owner - full control including deletion and ownership transfer.
    #[sea_orm(string_value = "owner")]
    Owner,
}

impl Default for GroupRole {
    fn default() -> Self {
        Self::Member
    }
}

impl GroupRole {
    /// Position in the privilege order. Higher means more privileged.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Member => 1,
            Self::Admin => 2,
            Self::Owner => 3,
        }
    }

    /// Check if this is the owner role.
    #[must_use]
    pub const fn is_owner(self) -> bool {
        matches!(self, Self::Owner)
    }
}

impl PartialOrd for GroupRole {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupRole {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Group member - grants a user a role within a group, optionally until an
/// expiry instant.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "group_member")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The group the membership belongs to.
    #[sea_orm(indexed)]
    pub group_id: String,

    /// The member.
    #[sea_orm(indexed)]
    pub user_id: String,

    /// Role of the member in the group.
    pub role: GroupRole,

    /// Expiry instant; NULL means permanent. Owner memberships are always
    /// permanent.
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// When the membership was created.
    pub created_at: DateTimeWithTimeZone,

    /// When the membership was last updated.
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether the membership still grants rights at `now`.
    ///
    /// The comparison is strict: a membership expiring exactly at `now` is
    /// already inactive.
    #[must_use]
    pub fn is_active_at(&self, now: &DateTimeWithTimeZone) -> bool {
        self.expires_at.as_ref().is_none_or(|expires| expires > now)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn membership(expires_at: Option<DateTimeWithTimeZone>) -> Model {
        Model {
            id: "m1".to_string(),
            group_id: "g1".to_string(),
            user_id: "u1".to_string(),
            role: GroupRole::Member,
            expires_at,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[test]
    fn test_role_order_is_total() {
        let roles = [GroupRole::Member, GroupRole::Admin, GroupRole::Owner];
        for a in roles {
            for b in roles {
                let ordered = [a < b, a == b, a > b];
                assert_eq!(ordered.iter().filter(|&&x| x).count(), 1);
            }
        }

        assert!(GroupRole::Member < GroupRole::Admin);
        assert!(GroupRole::Admin < GroupRole::Owner);
        assert!(GroupRole::Owner >= GroupRole::Admin);
    }

    #[test]
    fn test_permanent_membership_is_active() {
        let now = Utc::now().into();
        assert!(membership(None).is_active_at(&now));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let now: DateTimeWithTimeZone = Utc::now().into();

        // Expiring exactly now: inactive.
        assert!(!membership(Some(now)).is_active_at(&now));

        // One microsecond in the future: still active.
        let just_after = now + Duration::microseconds(1);
        assert!(membership(Some(just_after)).is_active_at(&now));

        // Already expired: inactive.
        let just_before = now - Duration::microseconds(1);
        assert!(!membership(Some(just_before)).is_active_at(&now));
    }
}
