//! Permission grant service.
//!
//! Grants and revokes a group's access level on a resource. Granting is
//! independent of group membership: any holder of full access on a resource
//! may delegate it to any group.

use chrono::Utc;
use lernio_common::{AppError, AppResult, IdGenerator};
use lernio_db::entities::group_member::GroupRole;
use lernio_db::entities::permission::{self, AccessLevel, ResourceRef};
use lernio_db::repositories::PermissionRepository;
use sea_orm::Set;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Deserialize;

use crate::caller::Caller;
use crate::services::access::AccessService;

/// Input for granting a group access to a resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantPermissionInput {
    pub group_id: String,
    /// Resource to delegate.
    #[serde(flatten)]
    pub resource: ResourceRef,
    /// Access level to grant.
    pub access_level: AccessLevel,
}

/// Service for managing permission grants.
#[derive(Clone)]
pub struct PermissionService {
    permission_repo: PermissionRepository,
    access: AccessService,
    id_gen: IdGenerator,
}

impl PermissionService {
    /// Create a new permission service.
    #[must_use]
    pub const fn new(permission_repo: PermissionRepository, access: AccessService) -> Self {
        Self {
            permission_repo,
            access,
            id_gen: IdGenerator::new(),
        }
    }

    /// Grant a group an access level on a resource.
    ///
    /// Requires full access to the resource; membership in the receiving
    /// group is not required.
    pub async fn grant(
        &self,
        caller: &Caller,
        input: GrantPermissionInput,
    ) -> AppResult<permission::Model> {
        if !self
            .access
            .effective_has_access(caller, &input.resource, AccessLevel::Full)
            .await?
        {
            return Err(AppError::Forbidden(
                "Full access to the resource is required".to_string(),
            ));
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = permission::ActiveModel {
            id: Set(self.id_gen.generate()),
            group_id: Set(input.group_id),
            resource_kind: Set(input.resource.kind()),
            resource_id: Set(input.resource.id().to_string()),
            access_level: Set(input.access_level),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let created = self.permission_repo.create(model).await?;

        tracing::info!(
            permission_id = %created.id,
            group_id = %created.group_id,
            grantor_id = %caller.user_id,
            level = ?created.access_level,
            "Group permission granted"
        );

        Ok(created)
    }

    /// Revoke a permission by id.
    ///
    /// Allowed for site admins, admins of the holding group, and holders of
    /// full access on the targeted resource.
    pub async fn revoke(&self, caller: &Caller, permission_id: &str) -> AppResult<()> {
        let Some(perm) = self.permission_repo.find_by_id(permission_id).await? else {
            return Err(AppError::Forbidden("Invalid permission".to_string()));
        };

        let mut authorized = caller.is_site_admin();
        if !authorized {
            authorized = self
                .access
                .has_group_role(&perm.group_id, &caller.user_id, GroupRole::Admin)
                .await?;
        }
        if !authorized {
            authorized = self
                .access
                .has_access(&caller.user_id, &perm.resource(), AccessLevel::Full)
                .await?;
        }

        if !authorized {
            return Err(AppError::Forbidden(
                "Insufficient permissions to revoke".to_string(),
            ));
        }

        self.permission_repo.delete(&perm.id).await?;

        tracing::info!(
            permission_id = %perm.id,
            group_id = %perm.group_id,
            revoker_id = %caller.user_id,
            "Group permission revoked"
        );

        Ok(())
    }
}
