//! Group lifecycle service.
//!
//! Creation, diff-authorized update, and deletion of groups. Update
//! authorization is granular: the name, the member set, and the permission
//! set are each gated on their own right, and only the parts that actually
//! changed are re-authorized.

use std::collections::HashMap;

use chrono::Utc;
use lernio_common::{AppError, AppResult, IdGenerator};
use lernio_db::entities::group_member::GroupRole;
use lernio_db::entities::permission::{AccessLevel, ResourceKind, ResourceRef};
use lernio_db::entities::{group, group_member, permission};
use lernio_db::repositories::{GroupRepository, MemberUpsert, PermissionRepository, PermissionUpsert};
use sea_orm::Set;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::caller::Caller;
use crate::services::access::{AccessService, ResourceCheck};

/// One permission entry in a group create/update payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    /// Resource the group is granted access to.
    #[serde(flatten)]
    pub resource: ResourceRef,
    /// Access level granted.
    pub access_level: AccessLevel,
}

/// One member entry in a group create/update payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    /// The member.
    pub user_id: String,
    /// Role to hold.
    pub role: GroupRole,
    /// Expiry instant; absent means permanent.
    #[serde(default)]
    pub expires_at: Option<DateTimeWithTimeZone>,
}

/// Input for creating a group.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupInput {
    #[validate(length(min = 3, max = 128))]
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

/// Input for updating a group. Carries the full target state plus the
/// version the caller read, for conflict detection.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupInput {
    pub id: String,
    pub version: i64,
    #[validate(length(min = 3, max = 128))]
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

/// A group with its memberships and permissions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    pub group: group::Model,
    pub members: Vec<group_member::Model>,
    pub permissions: Vec<permission::Model>,
}

/// Service for managing the group lifecycle.
#[derive(Clone)]
pub struct GroupService {
    group_repo: GroupRepository,
    permission_repo: PermissionRepository,
    access: AccessService,
    id_gen: IdGenerator,
}

impl GroupService {
    /// Create a new group service.
    #[must_use]
    pub const fn new(
        group_repo: GroupRepository,
        permission_repo: PermissionRepository,
        access: AccessService,
    ) -> Self {
        Self {
            group_repo,
            permission_repo,
            access,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a new group.
    ///
    /// Root groups (no parent) are reserved to site admins. Everyone else
    /// must administer the parent group and hold full access to every
    /// resource named in the initial permission set. The creator always
    /// becomes the permanent owner; the supplied member list must not name
    /// an owner, and must not name the creator.
    pub async fn create(&self, caller: &Caller, input: CreateGroupInput) -> AppResult<group::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if input.members.iter().any(|m| m.role.is_owner()) {
            return Err(AppError::Validation(
                "Owner role cannot be assigned through the member list".to_string(),
            ));
        }
        // A creator entry would sit next to the automatic owner membership
        // as a second row for the same user.
        if input.members.iter().any(|m| m.user_id == caller.user_id) {
            return Err(AppError::Validation(
                "Creator must not appear in the member list".to_string(),
            ));
        }

        if !caller.is_site_admin() {
            let Some(parent_id) = input.parent_id.as_deref() else {
                return Err(AppError::Forbidden(
                    "Only site admins can create root groups".to_string(),
                ));
            };

            let checks = full_access_checks(&input.permissions);
            let parent_ok = self
                .access
                .has_group_role(parent_id, &caller.user_id, GroupRole::Admin)
                .await?;
            let resources_ok = self
                .access
                .has_access_batch(&caller.user_id, &checks)
                .await?;

            if !(parent_ok && resources_ok) {
                return Err(AppError::Forbidden(
                    "Insufficient permissions to create group".to_string(),
                ));
            }
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        let group_id = self.id_gen.generate();

        let group = group::ActiveModel {
            id: Set(group_id.clone()),
            name: Set(input.name),
            parent_id: Set(input.parent_id),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let mut members = Vec::with_capacity(input.members.len() + 1);
        members.push(group_member::ActiveModel {
            id: Set(self.id_gen.generate()),
            group_id: Set(group_id.clone()),
            user_id: Set(caller.user_id.clone()),
            role: Set(GroupRole::Owner),
            expires_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        });
        for entry in input.members {
            members.push(group_member::ActiveModel {
                id: Set(self.id_gen.generate()),
                group_id: Set(group_id.clone()),
                user_id: Set(entry.user_id),
                role: Set(entry.role),
                expires_at: Set(entry.expires_at),
                created_at: Set(now),
                updated_at: Set(None),
            });
        }

        let permissions = input
            .permissions
            .into_iter()
            .map(|entry| permission::ActiveModel {
                id: Set(self.id_gen.generate()),
                group_id: Set(group_id.clone()),
                resource_kind: Set(entry.resource.kind()),
                resource_id: Set(entry.resource.id().to_string()),
                access_level: Set(entry.access_level),
                created_at: Set(now),
                updated_at: Set(None),
            })
            .collect();

        let created = self
            .group_repo
            .create_group(group, members, permissions)
            .await?;

        tracing::info!(
            group_id = %created.id,
            user_id = %caller.user_id,
            "Group created"
        );

        Ok(created)
    }

    /// Update a group to the supplied target state.
    ///
    /// Each changed aspect is authorized on its own: renaming needs the
    /// owner, member changes need an admin, permission changes need full
    /// access to every touched resource. Site admins pass all three gates.
    /// The whole write is applied against the version the caller read and
    /// fails with a conflict when that version is stale.
    pub async fn update(&self, caller: &Caller, input: UpdateGroupInput) -> AppResult<group::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let group = self.group_repo.get_by_id(&input.id).await?;

        // A group is never reparented.
        if input.parent_id != group.parent_id {
            return Err(AppError::Forbidden(
                "Cannot change the parent of a group".to_string(),
            ));
        }

        if input.name != group.name
            && !caller.is_site_admin()
            && !self
                .access
                .has_group_role(&group.id, &caller.user_id, GroupRole::Owner)
                .await?
        {
            return Err(AppError::Forbidden(
                "Insufficient permissions to rename the group".to_string(),
            ));
        }

        validate_single_permanent_owner(&input.members)?;

        let existing_members = self.group_repo.list_members(&group.id).await?;
        if members_changed(&input.members, &existing_members)
            && !caller.is_site_admin()
            && !self
                .access
                .has_group_role(&group.id, &caller.user_id, GroupRole::Admin)
                .await?
        {
            return Err(AppError::Forbidden(
                "Insufficient permissions to update members".to_string(),
            ));
        }

        let existing_perms = self.permission_repo.find_for_group(&group.id).await?;
        let touched = permission_diff(&input.permissions, &existing_perms);
        if !touched.is_empty() && !caller.is_site_admin() {
            let checks: Vec<ResourceCheck> = touched
                .into_iter()
                .map(|resource| ResourceCheck {
                    resource,
                    access_level: AccessLevel::Full,
                })
                .collect();

            if !self
                .access
                .has_access_batch(&caller.user_id, &checks)
                .await?
            {
                return Err(AppError::Forbidden(
                    "Insufficient permissions to update permissions".to_string(),
                ));
            }
        }

        let members = input
            .members
            .into_iter()
            .map(|m| MemberUpsert {
                id: self.id_gen.generate(),
                user_id: m.user_id,
                role: m.role,
                expires_at: m.expires_at,
            })
            .collect();
        let permissions = input
            .permissions
            .into_iter()
            .map(|p| PermissionUpsert {
                id: self.id_gen.generate(),
                resource: p.resource,
                access_level: p.access_level,
            })
            .collect();

        let updated = self
            .group_repo
            .update_group(
                &group.id,
                input.version,
                input.name,
                members,
                permissions,
                Utc::now().into(),
            )
            .await?;

        tracing::info!(
            group_id = %updated.id,
            user_id = %caller.user_id,
            version = updated.version,
            "Group updated"
        );

        Ok(updated)
    }

    /// Delete a group. Memberships and permissions cascade.
    pub async fn delete(&self, caller: &Caller, group_id: &str) -> AppResult<()> {
        let group = self.group_repo.get_by_id(group_id).await?;

        if !caller.is_site_admin()
            && !self
                .access
                .has_group_role(&group.id, &caller.user_id, GroupRole::Owner)
                .await?
        {
            return Err(AppError::Forbidden(
                "Only the owner can delete the group".to_string(),
            ));
        }

        self.group_repo.delete_group(&group.id).await?;

        tracing::info!(group_id = %group.id, user_id = %caller.user_id, "Group deleted");

        Ok(())
    }

    /// Fetch a group with its members and permissions. Restricted to site
    /// admins and group members.
    pub async fn get(&self, caller: &Caller, group_id: &str) -> AppResult<GroupDetails> {
        if !caller.is_site_admin()
            && !self
                .access
                .has_group_role(group_id, &caller.user_id, GroupRole::Member)
                .await?
        {
            return Err(AppError::Forbidden(
                "Not a member of this group".to_string(),
            ));
        }

        let group = self.group_repo.get_by_id(group_id).await?;
        let members = self.group_repo.list_members(&group.id).await?;
        let permissions = self.permission_repo.find_for_group(&group.id).await?;

        Ok(GroupDetails {
            group,
            members,
            permissions,
        })
    }

    /// List the groups a user holds an active membership in.
    pub async fn list_joined(&self, user_id: &str) -> AppResult<Vec<group::Model>> {
        self.group_repo
            .find_joined_by_user(user_id, Utc::now().into())
            .await
    }
}

/// Requirements demanding full access on every resource in `entries`.
fn full_access_checks(entries: &[PermissionEntry]) -> Vec<ResourceCheck> {
    entries
        .iter()
        .map(|entry| ResourceCheck {
            resource: entry.resource.clone(),
            access_level: AccessLevel::Full,
        })
        .collect()
}

/// Validate that `members` names exactly one owner and that the owner entry
/// is permanent.
fn validate_single_permanent_owner(members: &[MemberEntry]) -> AppResult<()> {
    let mut owners = members.iter().filter(|m| m.role.is_owner());

    match (owners.next(), owners.next()) {
        (Some(owner), None) if owner.expires_at.is_none() => Ok(()),
        (Some(_), None) => Err(AppError::Validation(
            "Owner membership cannot expire".to_string(),
        )),
        _ => Err(AppError::Validation(
            "Group must have exactly one owner".to_string(),
        )),
    }
}

/// Whether the supplied member set differs from the persisted one. An entry
/// counts as changed when it is absent on either side, or present on both
/// with a different role or expiry instant.
fn members_changed(supplied: &[MemberEntry], existing: &[group_member::Model]) -> bool {
    let mut diff: HashMap<&str, (GroupRole, Option<DateTimeWithTimeZone>)> = supplied
        .iter()
        .map(|m| (m.user_id.as_str(), (m.role, m.expires_at)))
        .collect();

    for old in existing {
        match diff.get(old.user_id.as_str()) {
            Some((role, expires_at)) if *role == old.role && *expires_at == old.expires_at => {
                diff.remove(old.user_id.as_str());
            }
            // Present on both sides but different: stays in the diff.
            Some(_) => {}
            // Removed member: counts as a change.
            None => {
                diff.insert(old.user_id.as_str(), (old.role, old.expires_at));
            }
        }
    }

    !diff.is_empty()
}

/// Resources whose permission entry differs between the supplied and the
/// persisted set. Course-keyed and lesson-keyed entries never collide even
/// for identical raw ids.
fn permission_diff(
    supplied: &[PermissionEntry],
    existing: &[permission::Model],
) -> Vec<ResourceRef> {
    let mut diff: HashMap<(ResourceKind, &str), AccessLevel> = supplied
        .iter()
        .map(|p| ((p.resource.kind(), p.resource.id()), p.access_level))
        .collect();

    for old in existing {
        let key = (old.resource_kind, old.resource_id.as_str());
        match diff.get(&key) {
            Some(level) if *level == old.access_level => {
                diff.remove(&key);
            }
            Some(_) => {}
            None => {
                diff.insert(key, old.access_level);
            }
        }
    }

    diff.into_keys()
        .map(|(kind, id)| ResourceRef::from_parts(kind, id.to_string()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lernio_db::entities::user::UserRole;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn service(db: sea_orm::DatabaseConnection) -> GroupService {
        let db = Arc::new(db);
        let group_repo = GroupRepository::new(Arc::clone(&db));
        let permission_repo = PermissionRepository::new(Arc::clone(&db));
        let access = AccessService::new(permission_repo.clone(), group_repo.clone());
        GroupService::new(group_repo, permission_repo, access)
    }

    fn member(user_id: &str, role: GroupRole) -> MemberEntry {
        MemberEntry {
            user_id: user_id.to_string(),
            role,
            expires_at: None,
        }
    }

    fn existing_member(user_id: &str, role: GroupRole) -> group_member::Model {
        group_member::Model {
            id: format!("m-{user_id}"),
            group_id: "g1".to_string(),
            user_id: user_id.to_string(),
            role,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn existing_perm(resource: ResourceRef, level: AccessLevel) -> permission::Model {
        permission::Model {
            id: format!("p-{}", resource.id()),
            group_id: "g1".to_string(),
            resource_kind: resource.kind(),
            resource_id: resource.id().to_string(),
            access_level: level,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[test]
    fn test_owner_validation() {
        // Exactly one permanent owner passes.
        assert!(
            validate_single_permanent_owner(&[
                member("u1", GroupRole::Owner),
                member("u2", GroupRole::Member),
            ])
            .is_ok()
        );

        // Zero owners.
        assert!(matches!(
            validate_single_permanent_owner(&[member("u1", GroupRole::Admin)]),
            Err(AppError::Validation(_))
        ));

        // Two owners.
        assert!(matches!(
            validate_single_permanent_owner(&[
                member("u1", GroupRole::Owner),
                member("u2", GroupRole::Owner),
            ]),
            Err(AppError::Validation(_))
        ));

        // Expiring owner.
        let mut expiring = member("u1", GroupRole::Owner);
        expiring.expires_at = Some(Utc::now().into());
        assert!(matches!(
            validate_single_permanent_owner(&[expiring]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_members_changed_detects_additions_removals_and_edits() {
        let existing = vec![
            existing_member("u1", GroupRole::Owner),
            existing_member("u2", GroupRole::Member),
        ];

        // Identical set: unchanged.
        assert!(!members_changed(
            &[member("u1", GroupRole::Owner), member("u2", GroupRole::Member)],
            &existing
        ));

        // Role edit.
        assert!(members_changed(
            &[member("u1", GroupRole::Owner), member("u2", GroupRole::Admin)],
            &existing
        ));

        // Removal.
        assert!(members_changed(&[member("u1", GroupRole::Owner)], &existing));

        // Addition.
        assert!(members_changed(
            &[
                member("u1", GroupRole::Owner),
                member("u2", GroupRole::Member),
                member("u3", GroupRole::Member),
            ],
            &existing
        ));

        // Expiry edit.
        let mut expiring = member("u2", GroupRole::Member);
        expiring.expires_at = Some(Utc::now().into());
        assert!(members_changed(
            &[member("u1", GroupRole::Owner), expiring],
            &existing
        ));
    }

    #[test]
    fn test_permission_diff_keeps_course_and_lesson_keys_apart() {
        // Persisted: course "42". Supplied: lesson "42" at the same level.
        // Both sides must surface in the diff - nothing matches across kinds.
        let existing = vec![existing_perm(
            ResourceRef::Course("42".to_string()),
            AccessLevel::Edit,
        )];
        let supplied = vec![PermissionEntry {
            resource: ResourceRef::Lesson("42".to_string()),
            access_level: AccessLevel::Edit,
        }];

        let mut touched = permission_diff(&supplied, &existing);
        touched.sort_by_key(|r| r.kind() == ResourceKind::Lesson);

        assert_eq!(touched.len(), 2);
        assert_eq!(touched[0], ResourceRef::Course("42".to_string()));
        assert_eq!(touched[1], ResourceRef::Lesson("42".to_string()));
    }

    #[test]
    fn test_permission_diff_ignores_unchanged_entries() {
        let course = ResourceRef::Course("c1".to_string());
        let existing = vec![existing_perm(course.clone(), AccessLevel::Edit)];
        let supplied = vec![PermissionEntry {
            resource: course,
            access_level: AccessLevel::Edit,
        }];

        assert!(permission_diff(&supplied, &existing).is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_owner_in_member_list() {
        // Rejected before any query is issued.
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let caller = Caller::new("u1", UserRole::Admin);

        let result = service
            .create(
                &caller,
                CreateGroupInput {
                    name: "Authors".to_string(),
                    parent_id: None,
                    permissions: vec![],
                    members: vec![member("u2", GroupRole::Owner)],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_creator_in_member_list() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let caller = Caller::new("u1", UserRole::Admin);

        let result = service
            .create(
                &caller,
                CreateGroupInput {
                    name: "Authors".to_string(),
                    parent_id: None,
                    permissions: vec![],
                    members: vec![member("u1", GroupRole::Member)],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_root_group_denied_for_regular_users() {
        // No store query happens: the parent gate fires first.
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let caller = Caller::new("u1", UserRole::User);

        let result = service
            .create(
                &caller,
                CreateGroupInput {
                    name: "Authors".to_string(),
                    parent_id: None,
                    permissions: vec![],
                    members: vec![],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_create_subgroup_denied_without_parent_admin() {
        // The caller is no member of the parent: the active-membership lookup
        // returns nothing and authorization fails before any write.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<group_member::Model>::new()])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("u1", UserRole::User);

        let result = service
            .create(
                &caller,
                CreateGroupInput {
                    name: "Subgroup".to_string(),
                    parent_id: Some("parent".to_string()),
                    permissions: vec![],
                    members: vec![],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_site_admin_creates_root_group_with_owner_membership() {
        let created = group::Model {
            id: "g1".to_string(),
            name: "Root".to_string(),
            parent_id: None,
            version: 1,
            created_at: Utc::now().into(),
            updated_at: None,
        };
        let owner_row = existing_member("admin", GroupRole::Owner);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![created.clone()]])
            .append_query_results([vec![owner_row]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("admin", UserRole::Admin);

        let result = service
            .create(
                &caller,
                CreateGroupInput {
                    name: "Root".to_string(),
                    parent_id: None,
                    permissions: vec![],
                    members: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(result.name, "Root");
        assert_eq!(result.version, 1);
    }

    #[tokio::test]
    async fn test_update_rejects_reparenting() {
        let group = group::Model {
            id: "g1".to_string(),
            name: "Authors".to_string(),
            parent_id: None,
            version: 1,
            created_at: Utc::now().into(),
            updated_at: None,
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![group]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("admin", UserRole::Admin);

        let result = service
            .update(
                &caller,
                UpdateGroupInput {
                    id: "g1".to_string(),
                    version: 1,
                    name: "Authors".to_string(),
                    parent_id: Some("other".to_string()),
                    permissions: vec![],
                    members: vec![member("admin", GroupRole::Owner)],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_member_set_without_owner() {
        let group = group::Model {
            id: "g1".to_string(),
            name: "Authors".to_string(),
            parent_id: None,
            version: 1,
            created_at: Utc::now().into(),
            updated_at: None,
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![group]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("admin", UserRole::Admin);

        let result = service
            .update(
                &caller,
                UpdateGroupInput {
                    id: "g1".to_string(),
                    version: 1,
                    name: "Authors".to_string(),
                    parent_id: None,
                    permissions: vec![],
                    members: vec![member("u2", GroupRole::Member)],
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
