//! Membership service.
//!
//! Grants and revokes non-owner roles and performs atomic ownership
//! transfer. Ownership never moves through the plain grant/revoke paths.

use chrono::{Duration, Utc};
use lernio_common::{AppError, AppResult, IdGenerator};
use lernio_db::entities::group_member::{self, GroupRole};
use lernio_db::repositories::GroupRepository;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Deserialize;

use crate::caller::Caller;
use crate::services::access::AccessService;

/// Input for granting a group role to a user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantMembershipInput {
    pub group_id: String,
    pub user_id: String,
    pub role: GroupRole,
    /// Lifetime of the membership in minutes; absent means permanent.
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

/// Service for managing group memberships.
#[derive(Clone)]
pub struct MembershipService {
    group_repo: GroupRepository,
    access: AccessService,
    id_gen: IdGenerator,
}

impl MembershipService {
    /// Create a new membership service.
    #[must_use]
    pub const fn new(group_repo: GroupRepository, access: AccessService) -> Self {
        Self {
            group_repo,
            access,
            id_gen: IdGenerator::new(),
        }
    }

    /// Grant a non-owner role, optionally time-bounded.
    pub async fn grant(
        &self,
        caller: &Caller,
        input: GrantMembershipInput,
    ) -> AppResult<group_member::Model> {
        if input.role.is_owner() {
            return Err(AppError::Validation(
                "Ownership is granted through transfer only".to_string(),
            ));
        }

        if !self
            .access
            .effective_has_group_role(caller, &input.group_id, GroupRole::Admin)
            .await?
        {
            return Err(AppError::Forbidden(
                "Insufficient permissions to grant group access".to_string(),
            ));
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        let expires_at = input
            .duration_minutes
            .map(|minutes| now + Duration::minutes(minutes));

        let membership = self
            .group_repo
            .upsert_membership(
                &input.group_id,
                &input.user_id,
                self.id_gen.generate(),
                input.role,
                expires_at,
                now,
            )
            .await?;

        tracing::info!(
            group_id = %input.group_id,
            user_id = %input.user_id,
            grantor_id = %caller.user_id,
            role = ?input.role,
            "Group access granted"
        );

        Ok(membership)
    }

    /// Revoke a membership. Ownership cannot be revoked this way.
    pub async fn revoke(&self, caller: &Caller, group_id: &str, user_id: &str) -> AppResult<()> {
        let Some(membership) = self.group_repo.find_membership(group_id, user_id).await? else {
            return Err(AppError::Forbidden("Invalid membership".to_string()));
        };

        if membership.role.is_owner() {
            return Err(AppError::Forbidden(
                "Ownership cannot be revoked; transfer it instead".to_string(),
            ));
        }

        if !self
            .access
            .effective_has_group_role(caller, group_id, GroupRole::Admin)
            .await?
        {
            return Err(AppError::Forbidden(
                "Insufficient permissions to revoke group access".to_string(),
            ));
        }

        self.group_repo.delete_membership(group_id, user_id).await?;

        tracing::info!(
            group_id = %group_id,
            user_id = %user_id,
            revoker_id = %caller.user_id,
            "Group access revoked"
        );

        Ok(())
    }

    /// Transfer group ownership to `new_owner_id`.
    ///
    /// The current owner is demoted to admin and the new owner becomes the
    /// permanent owner; both writes commit together or not at all, so the
    /// group never observes zero or two owners. Site admins may transfer any
    /// group, demoting whoever currently owns it; everyone else must be the
    /// owner.
    pub async fn change_owner(
        &self,
        caller: &Caller,
        group_id: &str,
        new_owner_id: &str,
    ) -> AppResult<()> {
        let demoted_user_id = if caller.is_site_admin() {
            self.group_repo
                .find_owner_membership(group_id)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!("Group {group_id} has no owner membership"))
                })?
                .user_id
        } else {
            match self
                .group_repo
                .find_membership(group_id, &caller.user_id)
                .await?
            {
                Some(membership) if membership.role.is_owner() => membership.user_id,
                _ => {
                    return Err(AppError::Forbidden(
                        "Only the owner can transfer ownership".to_string(),
                    ));
                }
            }
        };

        self.group_repo
            .transfer_ownership(
                group_id,
                &demoted_user_id,
                new_owner_id,
                self.id_gen.generate(),
                Utc::now().into(),
            )
            .await?;

        tracing::info!(
            group_id = %group_id,
            old_owner_id = %demoted_user_id,
            new_owner_id = %new_owner_id,
            caller_id = %caller.user_id,
            "Group ownership transferred"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lernio_db::entities::user::UserRole;
    use lernio_db::repositories::PermissionRepository;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn service(db: sea_orm::DatabaseConnection) -> MembershipService {
        let db = Arc::new(db);
        let group_repo = GroupRepository::new(Arc::clone(&db));
        let access = AccessService::new(
            PermissionRepository::new(Arc::clone(&db)),
            group_repo.clone(),
        );
        MembershipService::new(group_repo, access)
    }

    fn membership(user_id: &str, role: GroupRole) -> group_member::Model {
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

    #[tokio::test]
    async fn test_grant_rejects_owner_role_for_everyone() {
        // Fails before any authorization or store access, site admin or not.
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        for role in [UserRole::Admin, UserRole::User] {
            let caller = Caller::new("u1", role);
            let result = service
                .grant(
                    &caller,
                    GrantMembershipInput {
                        group_id: "g1".to_string(),
                        user_id: "u2".to_string(),
                        role: GroupRole::Owner,
                        duration_minutes: None,
                    },
                )
                .await;

            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_grant_denied_without_admin_role() {
        // Caller holds only a member role in the group.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![membership("u1", GroupRole::Member)]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("u1", UserRole::User);

        let result = service
            .grant(
                &caller,
                GrantMembershipInput {
                    group_id: "g1".to_string(),
                    user_id: "u2".to_string(),
                    role: GroupRole::Member,
                    duration_minutes: Some(30),
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_revoke_missing_membership_is_forbidden() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<group_member::Model>::new()])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("admin", UserRole::Admin);

        let result = service.revoke(&caller, "g1", "u2").await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_revoke_owner_is_forbidden() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![membership("u2", GroupRole::Owner)]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("admin", UserRole::Admin);

        let result = service.revoke(&caller, "g1", "u2").await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_change_owner_requires_owner_role() {
        // Caller is only an admin in the group.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![membership("u1", GroupRole::Admin)]])
            .into_connection();
        let service = service(db);
        let caller = Caller::new("u1", UserRole::User);

        let result = service.change_owner(&caller, "g1", "u2").await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
