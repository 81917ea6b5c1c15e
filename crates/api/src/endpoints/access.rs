//! Access check and permission grant endpoints.

use axum::{Json, Router, extract::State, routing::post};
use lernio_common::AppResult;
use lernio_core::{BestAccess, Caller, GrantPermissionInput, ResourceCheck};
use lernio_db::entities::group_member::GroupRole;
use lernio_db::entities::permission::ResourceRef;
use serde::Deserialize;

use crate::endpoints::groups::PermissionResponse;
use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Resolve-access request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAccessRequest {
    #[serde(flatten)]
    pub resource: ResourceRef,
}

/// Batch access check request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessRequest {
    pub checks: Vec<ResourceCheck>,
}

/// Group role check request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoleRequest {
    pub group_id: String,
    pub role: GroupRole,
}

/// Revoke permission request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokePermissionRequest {
    pub permission_id: String,
}

// ==================== Handlers ====================

/// Resolve the caller's best access level on a resource.
async fn resolve(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ResolveAccessRequest>,
) -> AppResult<ApiResponse<BestAccess>> {
    let caller = Caller::from_user(&user);
    let best = state
        .access_service
        .effective_best_access(&caller, &req.resource)
        .await?;

    Ok(ApiResponse::ok(best))
}

/// Check a batch of resource requirements, all-or-nothing.
async fn check(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CheckAccessRequest>,
) -> AppResult<ApiResponse<bool>> {
    let caller = Caller::from_user(&user);
    let granted = state
        .access_service
        .effective_has_access_batch(&caller, &req.checks)
        .await?;

    Ok(ApiResponse::ok(granted))
}

/// Check whether the caller holds at least a role in a group.
async fn group_role(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<GroupRoleRequest>,
) -> AppResult<ApiResponse<bool>> {
    let caller = Caller::from_user(&user);
    let granted = state
        .access_service
        .effective_has_group_role(&caller, &req.group_id, req.role)
        .await?;

    Ok(ApiResponse::ok(granted))
}

/// Grant a group an access level on a resource.
async fn grant_permission(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<GrantPermissionInput>,
) -> AppResult<ApiResponse<PermissionResponse>> {
    let caller = Caller::from_user(&user);
    let permission = state.permission_service.grant(&caller, input).await?;

    Ok(ApiResponse::ok(permission.into()))
}

/// Revoke a permission.
async fn revoke_permission(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RevokePermissionRequest>,
) -> AppResult<ApiResponse<()>> {
    let caller = Caller::from_user(&user);
    state
        .permission_service
        .revoke(&caller, &req.permission_id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Create the access router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/resolve", post(resolve))
        .route("/check", post(check))
        .route("/group-role", post(group_role))
        .route("/permissions/grant", post(grant_permission))
        .route("/permissions/revoke", post(revoke_permission))
}
