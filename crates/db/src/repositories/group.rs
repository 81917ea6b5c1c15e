//! Group repository.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lernio_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::entities::group_member::GroupRole;
use crate::entities::permission::{AccessLevel, ResourceKind, ResourceRef};
use crate::entities::{Group, GroupMember, Permission, group, group_member, permission};
use crate::repositories::tx_err;

/// Target state for one membership row inside a group write.
///
/// `id` is only consumed when the row does not exist yet.
#[derive(Debug, Clone)]
pub struct MemberUpsert {
    /// Row id to use when inserting.
    pub id: String,
    /// The member.
    pub user_id: String,
    /// Role to hold.
    pub role: GroupRole,
    /// Expiry instant; NULL means permanent.
    pub expires_at: Option<DateTimeWithTimeZone>,
}

/// Target state for one permission row inside a group write.
#[derive(Debug, Clone)]
pub struct PermissionUpsert {
    /// Row id to use when inserting.
    pub id: String,
    /// Resource the permission targets.
    pub resource: ResourceRef,
    /// Access level granted.
    pub access_level: AccessLevel,
}

/// Repository for group, membership, and group-scoped permission writes.
#[derive(Clone)]
pub struct GroupRepository {
    db: Arc<DatabaseConnection>,
}

impl GroupRepository {
    /// Create a new group repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    // ==================== Group Operations ====================

    /// Find group by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<group::Model>> {
        Group::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get group by ID, returning error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<group::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group not found: {id}")))
    }

    /// Find groups a user holds an active membership in.
    pub async fn find_joined_by_user(
        &self,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Vec<group::Model>> {
        let memberships = self.find_active_memberships(user_id, now).await?;
        let group_ids: Vec<String> = memberships.iter().map(|m| m.group_id.clone()).collect();

        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        Group::find()
            .filter(group::Column::Id.is_in(group_ids))
            .order_by(group::Column::Name, Order::Asc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a group together with its initial memberships and permissions.
    ///
    /// All rows are written in one transaction.
    pub async fn create_group(
        &self,
        group: group::ActiveModel,
        members: Vec<group_member::ActiveModel>,
        permissions: Vec<permission::ActiveModel>,
    ) -> AppResult<group::Model> {
        self.db
            .transaction::<_, group::Model, AppError>(move |txn| {
                Box::pin(async move {
                    let created = group
                        .insert(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    for member in members {
                        member
                            .insert(txn)
                            .await
                            .map_err(|e| AppError::Database(e.to_string()))?;
                    }

                    for perm in permissions {
                        perm.insert(txn)
                            .await
                            .map_err(|e| AppError::Database(e.to_string()))?;
                    }

                    Ok(created)
                })
            })
            .await
            .map_err(tx_err)
    }

    /// Apply a full group update: rename, bump the version, and reconcile the
    /// membership and permission sets against the supplied target states.
    ///
    /// The version bump doubles as the optimistic-concurrency check: when the
    /// persisted version no longer matches `expected_version`, another update
    /// won the race and this one fails with a conflict, writing nothing.
    ///
    /// Course-keyed and lesson-keyed permissions are reconciled independently
    /// so a course and a lesson sharing a raw id never cross-match.
    pub async fn update_group(
        &self,
        group_id: &str,
        expected_version: i64,
        name: String,
        members: Vec<MemberUpsert>,
        permissions: Vec<PermissionUpsert>,
        now: DateTimeWithTimeZone,
    ) -> AppResult<group::Model> {
        let group_id = group_id.to_string();

        self.db
            .transaction::<_, group::Model, AppError>(move |txn| {
                Box::pin(async move {
                    let bumped = Group::update_many()
                        .col_expr(group::Column::Name, Expr::value(name))
                        .col_expr(
                            group::Column::Version,
                            Expr::col(group::Column::Version).add(1),
                        )
                        .col_expr(group::Column::UpdatedAt, Expr::value(now))
                        .filter(group::Column::Id.eq(group_id.as_str()))
                        .filter(group::Column::Version.eq(expected_version))
                        .exec(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    if bumped.rows_affected == 0 {
                        return Err(AppError::Conflict(format!(
                            "Group {group_id} was modified concurrently"
                        )));
                    }

                    // Reconcile permissions, keyed by (kind, id).
                    let existing_perms = Permission::find()
                        .filter(permission::Column::GroupId.eq(group_id.as_str()))
                        .all(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    let keep_perms: HashSet<(ResourceKind, &str)> = permissions
                        .iter()
                        .map(|p| (p.resource.kind(), p.resource.id()))
                        .collect();

                    for old in &existing_perms {
                        if !keep_perms.contains(&(old.resource_kind, old.resource_id.as_str())) {
                            Permission::delete_by_id(old.id.as_str())
                                .exec(txn)
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                        }
                    }

                    let perms_by_key: HashMap<(ResourceKind, &str), &permission::Model> =
                        existing_perms
                            .iter()
                            .map(|p| ((p.resource_kind, p.resource_id.as_str()), p))
                            .collect();

                    for target in permissions {
                        let key = (target.resource.kind(), target.resource.id());
                        match perms_by_key.get(&key) {
                            Some(old) if old.access_level == target.access_level => {}
                            Some(old) => {
                                let mut active: permission::ActiveModel = (*old).clone().into();
                                active.access_level = Set(target.access_level);
                                active.updated_at = Set(Some(now));
                                active
                                    .update(txn)
                                    .await
                                    .map_err(|e| AppError::Database(e.to_string()))?;
                            }
                            None => {
                                permission::ActiveModel {
                                    id: Set(target.id),
                                    group_id: Set(group_id.clone()),
                                    resource_kind: Set(target.resource.kind()),
                                    resource_id: Set(target.resource.id().to_string()),
                                    access_level: Set(target.access_level),
                                    created_at: Set(now),
                                    updated_at: Set(None),
                                }
                                .insert(txn)
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                            }
                        }
                    }

                    // Reconcile memberships, keyed by user id.
                    let existing_members = GroupMember::find()
                        .filter(group_member::Column::GroupId.eq(group_id.as_str()))
                        .all(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    let keep_members: HashSet<&str> =
                        members.iter().map(|m| m.user_id.as_str()).collect();

                    for old in &existing_members {
                        if !keep_members.contains(old.user_id.as_str()) {
                            GroupMember::delete_by_id(old.id.as_str())
                                .exec(txn)
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                        }
                    }

                    let members_by_user: HashMap<&str, &group_member::Model> = existing_members
                        .iter()
                        .map(|m| (m.user_id.as_str(), m))
                        .collect();

                    for target in members {
                        match members_by_user.get(target.user_id.as_str()) {
                            Some(old)
                                if old.role == target.role
                                    && old.expires_at == target.expires_at => {}
                            Some(old) => {
                                let mut active: group_member::ActiveModel = (*old).clone().into();
                                active.role = Set(target.role);
                                active.expires_at = Set(target.expires_at);
                                active.updated_at = Set(Some(now));
                                active
                                    .update(txn)
                                    .await
                                    .map_err(|e| AppError::Database(e.to_string()))?;
                            }
                            None => {
                                group_member::ActiveModel {
                                    id: Set(target.id),
                                    group_id: Set(group_id.clone()),
                                    user_id: Set(target.user_id),
                                    role: Set(target.role),
                                    expires_at: Set(target.expires_at),
                                    created_at: Set(now),
                                    updated_at: Set(None),
                                }
                                .insert(txn)
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                            }
                        }
                    }

                    Group::find_by_id(group_id.as_str())
                        .one(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?
                        .ok_or_else(|| AppError::NotFound(format!("Group not found: {group_id}")))
                })
            })
            .await
            .map_err(tx_err)
    }

    /// Delete a group. Memberships and permissions cascade.
    pub async fn delete_group(&self, id: &str) -> AppResult<()> {
        Group::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    // ==================== Membership Operations ====================

    /// Find a membership row regardless of expiry.
    pub async fn find_membership(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> AppResult<Option<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a membership that is still active at `now`.
    pub async fn find_active_membership(
        &self,
        group_id: &str,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Option<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::UserId.eq(user_id))
            .filter(
                Condition::any()
                    .add(group_member::Column::ExpiresAt.is_null())
                    .add(group_member::Column::ExpiresAt.gt(now)),
            )
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All active memberships of a user, across groups.
    pub async fn find_active_memberships(
        &self,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Vec<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::UserId.eq(user_id))
            .filter(
                Condition::any()
                    .add(group_member::Column::ExpiresAt.is_null())
                    .add(group_member::Column::ExpiresAt.gt(now)),
            )
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the owner membership of a group.
    pub async fn find_owner_membership(
        &self,
        group_id: &str,
    ) -> AppResult<Option<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::Role.eq(GroupRole::Owner))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List members of a group.
    pub async fn list_members(&self, group_id: &str) -> AppResult<Vec<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .order_by(group_member::Column::CreatedAt, Order::Asc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert or update a membership row for (group, user).
    ///
    /// `new_id` is only consumed when no row exists yet.
    pub async fn upsert_membership(
        &self,
        group_id: &str,
        user_id: &str,
        new_id: String,
        role: GroupRole,
        expires_at: Option<DateTimeWithTimeZone>,
        now: DateTimeWithTimeZone,
    ) -> AppResult<group_member::Model> {
        match self.find_membership(group_id, user_id).await? {
            Some(existing) => {
                let mut active: group_member::ActiveModel = existing.into();
                active.role = Set(role);
                active.expires_at = Set(expires_at);
                active.updated_at = Set(Some(now));

                active
                    .update(self.db.as_ref())
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))
            }
            None => group_member::ActiveModel {
                id: Set(new_id),
                group_id: Set(group_id.to_string()),
                user_id: Set(user_id.to_string()),
                role: Set(role),
                expires_at: Set(expires_at),
                created_at: Set(now),
                updated_at: Set(None),
            }
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Delete a membership row.
    pub async fn delete_membership(&self, group_id: &str, user_id: &str) -> AppResult<()> {
        GroupMember::delete_many()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Move ownership from `old_owner_id` to `new_owner_id` in one
    /// transaction: the current owner is demoted to admin and the new owner
    /// is upserted as permanent owner. Either both writes commit or neither.
    pub async fn transfer_ownership(
        &self,
        group_id: &str,
        old_owner_id: &str,
        new_owner_id: &str,
        new_membership_id: String,
        now: DateTimeWithTimeZone,
    ) -> AppResult<()> {
        let group_id = group_id.to_string();
        let old_owner_id = old_owner_id.to_string();
        let new_owner_id = new_owner_id.to_string();

        self.db
            .transaction::<_, (), AppError>(move |txn| {
                Box::pin(async move {
                    let old_owner = GroupMember::find()
                        .filter(group_member::Column::GroupId.eq(group_id.as_str()))
                        .filter(group_member::Column::UserId.eq(old_owner_id.as_str()))
                        .one(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?
                        .ok_or_else(|| {
                            AppError::Internal(format!(
                                "Owner membership missing for group {group_id}"
                            ))
                        })?;

                    let mut demoted: group_member::ActiveModel = old_owner.into();
                    demoted.role = Set(GroupRole::Admin);
                    demoted.updated_at = Set(Some(now));
                    demoted
                        .update(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    let existing = GroupMember::find()
                        .filter(group_member::Column::GroupId.eq(group_id.as_str()))
                        .filter(group_member::Column::UserId.eq(new_owner_id.as_str()))
                        .one(txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    match existing {
                        Some(member) => {
                            let mut promoted: group_member::ActiveModel = member.into();
                            promoted.role = Set(GroupRole::Owner);
                            promoted.expires_at = Set(None);
                            promoted.updated_at = Set(Some(now));
                            promoted
                                .update(txn)
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                        }
                        None => {
                            group_member::ActiveModel {
                                id: Set(new_membership_id),
                                group_id: Set(group_id),
                                user_id: Set(new_owner_id),
                                role: Set(GroupRole::Owner),
                                expires_at: Set(None),
                                created_at: Set(now),
                                updated_at: Set(None),
                            }
                            .insert(txn)
                            .await
                            .map_err(|e| AppError::Database(e.to_string()))?;
                        }
                    }

                    Ok(())
                })
            })
            .await
            .map_err(tx_err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult, RuntimeErr};

    fn create_test_group(id: &str, name: &str) -> group::Model {
        group::Model {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: None,
            version: 1,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_member(id: &str, group_id: &str, user_id: &str, role: GroupRole) -> group_member::Model {
        group_member::Model {
            id: id.to_string(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            role,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let group = create_test_group("grp1", "Authors");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[group.clone()]])
                .into_connection(),
        );

        let repo = GroupRepository::new(db);
        let result = repo.find_by_id("grp1").await.unwrap();

        assert!(result.is_some());
        assert_eq!(result.unwrap().name, "Authors");
    }

    #[tokio::test]
    async fn test_update_group_stale_version_is_conflict() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = GroupRepository::new(db);
        let result = repo
            .update_group("grp1", 3, "Authors".to_string(), vec![], vec![], Utc::now().into())
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_transfer_ownership_fails_when_second_write_fails() {
        let old_owner = create_test_member("m1", "grp1", "u1", GroupRole::Owner);
        let demoted = create_test_member("m1", "grp1", "u1", GroupRole::Admin);

        // Lookup of the old owner and its demotion succeed; the promotion
        // lookup succeeds but the insert of the new owner errors out, which
        // must abort the whole transaction.
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![old_owner], vec![demoted]])
                .append_query_results([Vec::<group_member::Model>::new()])
                .append_query_errors([DbErr::Query(RuntimeErr::Internal(
                    "connection lost".to_string(),
                ))])
                .into_connection(),
        );

        let repo = GroupRepository::new(db);
        let result = repo
            .transfer_ownership("grp1", "u1", "u2", "m2".to_string(), Utc::now().into())
            .await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_find_joined_by_user_without_memberships() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<group_member::Model>::new()])
                .into_connection(),
        );

        let repo = GroupRepository::new(db);
        let groups = repo
            .find_joined_by_user("u1", Utc::now().into())
            .await
            .unwrap();

        assert!(groups.is_empty());
    }
}
