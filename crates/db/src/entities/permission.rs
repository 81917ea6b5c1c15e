//! Permission entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Access level a group holds on a resource.
///
/// Levels form a strict privilege order: `View < Edit < Full`. `Full` is the
/// delegation level - only holders of `Full` access may grant or reshuffle
/// permissions on the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum AccessLevel {
    /// Read-only access.
    #[sea_orm(string_value = "view")]
    View,
    /// Can modify the resource content.
    #[sea_orm(string_value = "edit")]
    Edit,
    /// Can manage the resource, including delegating access.
    #[sea_orm(string_value = "full")]
    Full,
}

impl AccessLevel {
    /// Position in the privilege order. Higher means more privileged.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::View => 1,
            Self::Edit => 2,
            Self::Full => 3,
        }
    }
}

impl PartialOrd for AccessLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Which content table a permission's resource id points into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum ResourceKind {
    /// A course.
    #[sea_orm(string_value = "course")]
    Course,
    /// A lesson.
    #[sea_orm(string_value = "lesson")]
    Lesson,
}

/// Tagged reference to exactly one content resource.
///
/// A course id and a lesson id are different resources even when the raw id
/// strings are identical; equality requires both the same variant and the
/// same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "resourceKind", content = "resourceId", rename_all = "camelCase")]
pub enum ResourceRef {
    /// A course, by course id.
    Course(String),
    /// A lesson, by lesson id.
    Lesson(String),
}

impl ResourceRef {
    /// Reassemble a reference from its stored parts.
    #[must_use]
    pub const fn from_parts(kind: ResourceKind, id: String) -> Self {
        match kind {
            ResourceKind::Course => Self::Course(id),
            ResourceKind::Lesson => Self::Lesson(id),
        }
    }

    /// The resource kind tag.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Course(_) => ResourceKind::Course,
            Self::Lesson(_) => ResourceKind::Lesson,
        }
    }

    /// The raw resource id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Course(id) | Self::Lesson(id) => id,
        }
    }
}

/// Permission - grants a group an access level on one resource.
///
/// At most one row per (group, resource) is meaningful; duplicates collapse to
/// the highest level during resolution.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "permission")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The group the permission is granted to.
    #[sea_orm(indexed)]
    pub group_id: String,

    /// Resource kind tag.
    pub resource_kind: ResourceKind,

    /// Raw resource id, interpreted under `resource_kind`.
    #[sea_orm(indexed)]
    pub resource_id: String,

    /// Access level granted.
    pub access_level: AccessLevel,

    /// When the permission was created.
    pub created_at: DateTimeWithTimeZone,

    /// When the permission was last updated.
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// The resource this permission targets.
    #[must_use]
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::from_parts(self.resource_kind, self.resource_id.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
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

    #[test]
    fn test_level_order_is_total() {
        let levels = [AccessLevel::View, AccessLevel::Edit, AccessLevel::Full];
        for a in levels {
            for b in levels {
                let ordered = [a < b, a == b, a > b];
                assert_eq!(ordered.iter().filter(|&&x| x).count(), 1);
            }
        }

        assert!(AccessLevel::View < AccessLevel::Edit);
        assert!(AccessLevel::Edit < AccessLevel::Full);
        assert!(AccessLevel::Full >= AccessLevel::Full);
    }

    #[test]
    fn test_resource_ref_equality_requires_same_kind() {
        let course = ResourceRef::Course("42".to_string());
        let lesson = ResourceRef::Lesson("42".to_string());

        assert_ne!(course, lesson);
        assert_eq!(course, ResourceRef::Course("42".to_string()));
        assert_eq!(course.id(), lesson.id());
        assert_ne!(course.kind(), lesson.kind());
    }

    #[test]
    fn test_resource_ref_round_trips_through_parts() {
        let lesson = ResourceRef::Lesson("l-7".to_string());
        let rebuilt = ResourceRef::from_parts(lesson.kind(), lesson.id().to_string());
        assert_eq!(lesson, rebuilt);
    }
}
