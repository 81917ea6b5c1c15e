//! API middleware.

#![allow(missing_docs)]

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use lernio_core::{AccessService, GroupService, MembershipService, PermissionService};
use lernio_db::repositories::UserRepository;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub access_service: AccessService,
    pub group_service: GroupService,
    pub membership_service: MembershipService,
    pub permission_service: PermissionService,
    pub user_repo: UserRepository,
}

/// Authentication middleware.
///
/// Resolves a bearer token to a user row and stores it in the request
/// extensions for the `AuthUser` extractor.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
        && let Ok(Some(user)) = state.user_repo.find_by_token(token).await
    {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}
