//! API endpoints.

mod access;
mod groups;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/groups", groups::router())
        .nest("/access", access::router())
}
