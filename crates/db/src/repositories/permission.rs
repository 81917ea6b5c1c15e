//! Permission repository.

use std::sync::Arc;

use lernio_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Query, SelectStatement};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder,
};

use crate::entities::permission::{ResourceKind, ResourceRef};
use crate::entities::{Permission, group_member, permission};

/// Repository for permission lookups and single-row writes.
#[derive(Clone)]
pub struct PermissionRepository {
    db: Arc<DatabaseConnection>,
}

/// Subquery selecting the groups `user_id` is an active member of at `now`.
///
/// Keeping resolution to a single round trip hinges on this: permission
/// queries embed the membership restriction instead of fetching memberships
/// separately.
fn active_member_groups(user_id: &str, now: DateTimeWithTimeZone) -> SelectStatement {
    Query::select()
        .column(group_member::Column::GroupId)
        .from(group_member::Entity)
        .and_where(Expr::col(group_member::Column::UserId).eq(user_id))
        .cond_where(
            Condition::any()
                .add(Expr::col(group_member::Column::ExpiresAt).is_null())
                .add(Expr::col(group_member::Column::ExpiresAt).gt(now)),
        )
        .to_owned()
}

impl PermissionRepository {
    /// Create a new permission repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find permission by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<permission::Model>> {
        Permission::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List permissions of a group.
    pub async fn find_for_group(&self, group_id: &str) -> AppResult<Vec<permission::Model>> {
        Permission::find()
            .filter(permission::Column::GroupId.eq(group_id))
            .order_by(permission::Column::CreatedAt, Order::Asc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Permissions on one resource held by groups the user is an active
    /// member of at `now`.
    pub async fn find_for_resource(
        &self,
        resource: &ResourceRef,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Vec<permission::Model>> {
        Permission::find()
            .filter(permission::Column::ResourceKind.eq(resource.kind()))
            .filter(permission::Column::ResourceId.eq(resource.id()))
            .filter(permission::Column::GroupId.in_subquery(active_member_groups(user_id, now)))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Permissions on any of the given course or lesson ids held by groups
    /// the user is an active member of at `now`.
    ///
    /// Course ids and lesson ids are matched under their own kind tag, so a
    /// course and a lesson sharing a raw id never satisfy each other.
    pub async fn find_for_resources(
        &self,
        course_ids: &[String],
        lesson_ids: &[String],
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Vec<permission::Model>> {
        if course_ids.is_empty() && lesson_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut resource_cond = Condition::any();
        if !course_ids.is_empty() {
            resource_cond = resource_cond.add(
                Condition::all()
                    .add(permission::Column::ResourceKind.eq(ResourceKind::Course))
                    .add(permission::Column::ResourceId.is_in(course_ids.iter().map(String::as_str))),
            );
        }
        if !lesson_ids.is_empty() {
            resource_cond = resource_cond.add(
                Condition::all()
                    .add(permission::Column::ResourceKind.eq(ResourceKind::Lesson))
                    .add(permission::Column::ResourceId.is_in(lesson_ids.iter().map(String::as_str))),
            );
        }

        Permission::find()
            .filter(resource_cond)
            .filter(permission::Column::GroupId.in_subquery(active_member_groups(user_id, now)))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new permission.
    pub async fn create(&self, model: permission::ActiveModel) -> AppResult<permission::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a permission.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        Permission::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
