//! Access resolution service.
//!
//! Answers the one question everything else builds on: what is the best
//! access level a user holds on a resource through any group they are an
//! active member of. "Effective" variants treat site admins as holding full
//! access everywhere without touching the store.

use std::collections::HashMap;

use chrono::Utc;
use lernio_common::AppResult;
use lernio_db::entities::group_member::GroupRole;
use lernio_db::entities::permission::{self, AccessLevel, ResourceKind, ResourceRef};
use lernio_db::repositories::{GroupRepository, PermissionRepository};
use serde::{Deserialize, Serialize};

use crate::caller::Caller;

/// One resource requirement inside an access check.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCheck {
    /// The resource to check.
    #[serde(flatten)]
    pub resource: ResourceRef,
    /// Minimum level required.
    pub access_level: AccessLevel,
}

/// Result of best-access resolution: the highest level found and one group
/// that grants it, or neither when no active membership grants anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestAccess {
    /// Highest access level held, if any.
    pub access_level: Option<AccessLevel>,
    /// A group granting that level. None for the site-admin shortcut.
    pub group_id: Option<String>,
}

impl BestAccess {
    /// No access at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            access_level: None,
            group_id: None,
        }
    }

    /// The site-admin shortcut: full access, attributable to no group.
    #[must_use]
    pub const fn site_admin() -> Self {
        Self {
            access_level: Some(AccessLevel::Full),
            group_id: None,
        }
    }
}

/// Service answering access and role queries.
#[derive(Clone)]
pub struct AccessService {
    permission_repo: PermissionRepository,
    group_repo: GroupRepository,
}

impl AccessService {
    /// Create a new access service.
    #[must_use]
    pub const fn new(permission_repo: PermissionRepository, group_repo: GroupRepository) -> Self {
        Self {
            permission_repo,
            group_repo,
        }
    }

    /// Best access level `user_id` holds on `resource` via any active
    /// membership, together with one group granting it.
    pub async fn resolve_best_access(
        &self,
        user_id: &str,
        resource: &ResourceRef,
    ) -> AppResult<BestAccess> {
        let perms = self
            .permission_repo
            .find_for_resource(resource, user_id, Utc::now().into())
            .await?;

        Ok(best_of(&perms))
    }

    /// Whether `user_id` holds at least `required` on `resource`.
    pub async fn has_access(
        &self,
        user_id: &str,
        resource: &ResourceRef,
        required: AccessLevel,
    ) -> AppResult<bool> {
        let best = self.resolve_best_access(user_id, resource).await?;
        Ok(best.access_level.is_some_and(|level| level >= required))
    }

    /// All-or-nothing batch check: true iff every requirement in `checks` is
    /// satisfied. Evaluated against one permission fetch; aggregation is
    /// keyed by (kind, id) so course and lesson ids never cross-match.
    pub async fn has_access_batch(
        &self,
        user_id: &str,
        checks: &[ResourceCheck],
    ) -> AppResult<bool> {
        if checks.is_empty() {
            return Ok(true);
        }

        let course_ids: Vec<String> = checks
            .iter()
            .filter(|c| c.resource.kind() == ResourceKind::Course)
            .map(|c| c.resource.id().to_string())
            .collect();
        let lesson_ids: Vec<String> = checks
            .iter()
            .filter(|c| c.resource.kind() == ResourceKind::Lesson)
            .map(|c| c.resource.id().to_string())
            .collect();

        let perms = self
            .permission_repo
            .find_for_resources(&course_ids, &lesson_ids, user_id, Utc::now().into())
            .await?;

        let best = best_access_by_resource(&perms);
        Ok(checks_satisfied(&best, checks))
    }

    /// Active role of `user_id` in `group_id`, if any.
    pub async fn group_role(&self, group_id: &str, user_id: &str) -> AppResult<Option<GroupRole>> {
        let membership = self
            .group_repo
            .find_active_membership(group_id, user_id, Utc::now().into())
            .await?;

        Ok(membership.map(|m| m.role))
    }

    /// Whether `user_id` holds at least `min_role` in `group_id`.
    pub async fn has_group_role(
        &self,
        group_id: &str,
        user_id: &str,
        min_role: GroupRole,
    ) -> AppResult<bool> {
        let role = self.group_role(group_id, user_id).await?;
        Ok(role.is_some_and(|role| role >= min_role))
    }

    // ==================== Effective Wrappers ====================
    //
    // Site admins are granted without a store query.

    /// Best access for a caller; site admins get full access via no group.
    pub async fn effective_best_access(
        &self,
        caller: &Caller,
        resource: &ResourceRef,
    ) -> AppResult<BestAccess> {
        if caller.is_site_admin() {
            return Ok(BestAccess::site_admin());
        }
        self.resolve_best_access(&caller.user_id, resource).await
    }

    /// Access check for a caller.
    pub async fn effective_has_access(
        &self,
        caller: &Caller,
        resource: &ResourceRef,
        required: AccessLevel,
    ) -> AppResult<bool> {
        if caller.is_site_admin() {
            return Ok(true);
        }
        self.has_access(&caller.user_id, resource, required).await
    }

    /// Batch access check for a caller.
    pub async fn effective_has_access_batch(
        &self,
        caller: &Caller,
        checks: &[ResourceCheck],
    ) -> AppResult<bool> {
        if caller.is_site_admin() {
            return Ok(true);
        }
        self.has_access_batch(&caller.user_id, checks).await
    }

    /// Group-role check for a caller.
    pub async fn effective_has_group_role(
        &self,
        caller: &Caller,
        group_id: &str,
        min_role: GroupRole,
    ) -> AppResult<bool> {
        if caller.is_site_admin() {
            return Ok(true);
        }
        self.has_group_role(group_id, &caller.user_id, min_role)
            .await
    }
}

/// Reduce permissions on a single resource to the best level and one group
/// granting it. Ties resolve to the first permission reaching the maximum.
fn best_of(perms: &[permission::Model]) -> BestAccess {
    perms
        .iter()
        .fold(BestAccess::none(), |best, perm| match best.access_level {
            Some(level) if level >= perm.access_level => best,
            _ => BestAccess {
                access_level: Some(perm.access_level),
                group_id: Some(perm.group_id.clone()),
            },
        })
}

/// Aggregate the best access level per (kind, id) key. Duplicate permissions
/// for the same resource collapse to the highest level.
fn best_access_by_resource(
    perms: &[permission::Model],
) -> HashMap<(ResourceKind, &str), AccessLevel> {
    let mut best: HashMap<(ResourceKind, &str), AccessLevel> = HashMap::new();
    for perm in perms {
        best.entry((perm.resource_kind, perm.resource_id.as_str()))
            .and_modify(|level| {
                if perm.access_level > *level {
                    *level = perm.access_level;
                }
            })
            .or_insert(perm.access_level);
    }
    best
}

/// True iff every check finds an aggregate at or above its required level.
fn checks_satisfied(
    best: &HashMap<(ResourceKind, &str), AccessLevel>,
    checks: &[ResourceCheck],
) -> bool {
    checks.iter().all(|check| {
        best.get(&(check.resource.kind(), check.resource.id()))
            .is_some_and(|level| *level >= check.access_level)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lernio_db::entities::user::UserRole;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn perm(group_id: &str, resource: ResourceRef, level: AccessLevel) -> permission::Model {
        permission::Model {
            id: format!("p-{group_id}-{}", resource.id()),
            group_id: group_id.to_string(),
            resource_kind: resource.kind(),
            resource_id: resource.id().to_string(),
            access_level: level,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn service(db: sea_orm::DatabaseConnection) -> AccessService {
        let db = Arc::new(db);
        AccessService::new(
            PermissionRepository::new(Arc::clone(&db)),
            GroupRepository::new(db),
        )
    }

    #[test]
    fn test_best_of_picks_highest_level() {
        let course = ResourceRef::Course("c1".to_string());
        let perms = vec![
            perm("g1", course.clone(), AccessLevel::View),
            perm("g2", course.clone(), AccessLevel::Full),
            perm("g3", course, AccessLevel::Edit),
        ];

        let best = best_of(&perms);
        assert_eq!(best.access_level, Some(AccessLevel::Full));
        assert_eq!(best.group_id, Some("g2".to_string()));
    }

    #[test]
    fn test_best_of_empty_is_none() {
        assert_eq!(best_of(&[]), BestAccess::none());
    }

    #[test]
    fn test_adding_higher_permission_never_decreases_result() {
        let course = ResourceRef::Course("c1".to_string());
        let mut perms = vec![perm("g1", course.clone(), AccessLevel::Edit)];
        let before = best_of(&perms).access_level.unwrap();

        perms.push(perm("g2", course, AccessLevel::Full));
        let after = best_of(&perms).access_level.unwrap();

        assert!(after >= before);
    }

    #[test]
    fn test_duplicate_permissions_collapse_to_highest() {
        let course = ResourceRef::Course("c1".to_string());
        let perms = vec![
            perm("g1", course.clone(), AccessLevel::View),
            perm("g1", course.clone(), AccessLevel::Edit),
        ];

        let best = best_access_by_resource(&perms);
        assert_eq!(
            best.get(&(ResourceKind::Course, "c1")),
            Some(&AccessLevel::Edit)
        );
    }

    #[test]
    fn test_batch_keys_isolate_course_and_lesson_with_same_id() {
        // Full access on Course "42" only.
        let perms = vec![perm(
            "g1",
            ResourceRef::Course("42".to_string()),
            AccessLevel::Full,
        )];
        let best = best_access_by_resource(&perms);

        let lesson_check = vec![ResourceCheck {
            resource: ResourceRef::Lesson("42".to_string()),
            access_level: AccessLevel::Full,
        }];
        let course_check = vec![ResourceCheck {
            resource: ResourceRef::Course("42".to_string()),
            access_level: AccessLevel::Full,
        }];

        assert!(!checks_satisfied(&best, &lesson_check));
        assert!(checks_satisfied(&best, &course_check));
    }

    #[test]
    fn test_any_failing_check_fails_the_batch() {
        let perms = vec![
            perm("g1", ResourceRef::Course("c1".to_string()), AccessLevel::Full),
            perm("g1", ResourceRef::Lesson("l1".to_string()), AccessLevel::View),
        ];
        let best = best_access_by_resource(&perms);

        let checks = vec![
            ResourceCheck {
                resource: ResourceRef::Course("c1".to_string()),
                access_level: AccessLevel::Full,
            },
            ResourceCheck {
                resource: ResourceRef::Lesson("l1".to_string()),
                access_level: AccessLevel::Edit,
            },
        ];

        assert!(!checks_satisfied(&best, &checks));
    }

    #[tokio::test]
    async fn test_site_admin_bypass_never_queries_the_store() {
        // The mock has no results appended, so any query would error out.
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let admin = Caller::new("u1", UserRole::Admin);
        let course = ResourceRef::Course("c1".to_string());

        assert!(
            service
                .effective_has_access(&admin, &course, AccessLevel::Full)
                .await
                .unwrap()
        );
        assert_eq!(
            service
                .effective_best_access(&admin, &course)
                .await
                .unwrap(),
            BestAccess::site_admin()
        );
        assert!(
            service
                .effective_has_access_batch(
                    &admin,
                    &[ResourceCheck {
                        resource: course,
                        access_level: AccessLevel::Full,
                    }]
                )
                .await
                .unwrap()
        );
        assert!(
            service
                .effective_has_group_role(&admin, "g1", GroupRole::Owner)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_member_level_grants_view_but_not_full() {
        let course = ResourceRef::Course("c1".to_string());
        let edit_perm = perm("g1", course.clone(), AccessLevel::Edit);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![edit_perm.clone()], vec![edit_perm]])
            .into_connection();
        let service = service(db);

        assert!(
            !service
                .has_access("u1", &course, AccessLevel::Full)
                .await
                .unwrap()
        );
        assert!(
            service
                .has_access("u1", &course, AccessLevel::View)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_has_group_role_requires_minimum_rank() {
        use lernio_db::entities::group_member;

        let membership = group_member::Model {
            id: "m1".to_string(),
            group_id: "g1".to_string(),
            user_id: "u1".to_string(),
            role: GroupRole::Member,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![membership.clone()], vec![membership]])
            .into_connection();
        let service = service(db);

        assert!(
            !service
                .has_group_role("g1", "u1", GroupRole::Admin)
                .await
                .unwrap()
        );
        assert!(
            service
                .has_group_role("g1", "u1", GroupRole::Member)
                .await
                .unwrap()
        );
    }
}
