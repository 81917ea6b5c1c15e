//! Group endpoints.

use axum::{Json, Router, extract::State, routing::post};
use lernio_common::AppResult;
use lernio_core::{
    Caller, CreateGroupInput, GrantMembershipInput, GroupDetails, UpdateGroupInput,
};
use lernio_db::entities::group_member::GroupRole;
use lernio_db::entities::permission::{AccessLevel, ResourceRef};
use lernio_db::entities::{group, group_member, permission};
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

// ==================== Request/Response Types ====================

/// Group response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl From<group::Model> for GroupResponse {
    fn from(g: group::Model) -> Self {
        Self {
            id: g.id,
            name: g.name,
            parent_id: g.parent_id,
            version: g.version,
            created_at: g.created_at.to_rfc3339(),
            updated_at: g.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Member response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub user_id: String,
    pub role: GroupRole,
    pub expires_at: Option<String>,
}

impl From<group_member::Model> for MemberResponse {
    fn from(m: group_member::Model) -> Self {
        Self {
            user_id: m.user_id,
            role: m.role,
            expires_at: m.expires_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Permission response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub id: String,
    pub group_id: String,
    #[serde(flatten)]
    pub resource: ResourceRef,
    pub access_level: AccessLevel,
}

impl From<permission::Model> for PermissionResponse {
    fn from(p: permission::Model) -> Self {
        let resource = p.resource();
        Self {
            id: p.id,
            group_id: p.group_id,
            resource,
            access_level: p.access_level,
        }
    }
}

/// Full group response with members and permissions.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetailResponse {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub version: i64,
    pub members: Vec<MemberResponse>,
    pub permissions: Vec<PermissionResponse>,
}

impl From<GroupDetails> for GroupDetailResponse {
    fn from(d: GroupDetails) -> Self {
        Self {
            id: d.group.id,
            name: d.group.name,
            parent_id: d.group.parent_id,
            version: d.group.version,
            members: d.members.into_iter().map(Into::into).collect(),
            permissions: d.permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Show group request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowGroupRequest {
    pub group_id: String,
}

/// Delete group request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteGroupRequest {
    pub group_id: String,
}

/// Revoke membership request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeMembershipRequest {
    pub group_id: String,
    pub user_id: String,
}

/// Transfer ownership request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOwnershipRequest {
    pub group_id: String,
    pub new_owner_id: String,
}

// ==================== Handlers ====================

/// Create a new group.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateGroupInput>,
) -> AppResult<ApiResponse<GroupResponse>> {
    let caller = Caller::from_user(&user);
    let group = state.group_service.create(&caller, input).await?;

    Ok(ApiResponse::ok(group.into()))
}

/// Update a group.
async fn update(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<UpdateGroupInput>,
) -> AppResult<ApiResponse<GroupResponse>> {
    let caller = Caller::from_user(&user);
    let group = state.group_service.update(&caller, input).await?;

    Ok(ApiResponse::ok(group.into()))
}

/// Delete a group.
async fn delete(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<DeleteGroupRequest>,
) -> AppResult<ApiResponse<()>> {
    let caller = Caller::from_user(&user);
    state.group_service.delete(&caller, &req.group_id).await?;

    Ok(ApiResponse::ok(()))
}

/// Show a group with members and permissions.
async fn show(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowGroupRequest>,
) -> AppResult<ApiResponse<GroupDetailResponse>> {
    let caller = Caller::from_user(&user);
    let details = state.group_service.get(&caller, &req.group_id).await?;

    Ok(ApiResponse::ok(details.into()))
}

/// List groups the caller is a member of.
async fn mine(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<GroupResponse>>> {
    let groups = state.group_service.list_joined(&user.id).await?;

    Ok(ApiResponse::ok(
        groups.into_iter().map(Into::into).collect(),
    ))
}

/// Grant a user a role in a group.
async fn grant_member(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<GrantMembershipInput>,
) -> AppResult<ApiResponse<MemberResponse>> {
    let caller = Caller::from_user(&user);
    let membership = state.membership_service.grant(&caller, input).await?;

    Ok(ApiResponse::ok(membership.into()))
}

/// Revoke a user's membership in a group.
async fn revoke_member(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RevokeMembershipRequest>,
) -> AppResult<ApiResponse<()>> {
    let caller = Caller::from_user(&user);
    state
        .membership_service
        .revoke(&caller, &req.group_id, &req.user_id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Transfer group ownership.
async fn transfer_ownership(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<TransferOwnershipRequest>,
) -> AppResult<ApiResponse<()>> {
    let caller = Caller::from_user(&user);
    state
        .membership_service
        .change_owner(&caller, &req.group_id, &req.new_owner_id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Create the groups router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/update", post(update))
        .route("/delete", post(delete))
        .route("/show", post(show))
        .route("/mine", post(mine))
        .route("/members/grant", post(grant_member))
        .route("/members/revoke", post(revoke_member))
        .route("/members/transfer-ownership", post(transfer_ownership))
}
