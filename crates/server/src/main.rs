//! Lernio server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware};
use lernio_api::{middleware::AppState, router as api_router};
use lernio_common::Config;
use lernio_core::{AccessService, GroupService, MembershipService, PermissionService};
use lernio_db::repositories::{GroupRepository, PermissionRepository, UserRepository};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lernio=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting lernio server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database and run migrations
    let db = lernio_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    lernio_db::migrate(&db).await?;
    info!("Migrations completed");

    // Initialize repositories
    let db = Arc::new(db);
    let user_repo = UserRepository::new(Arc::clone(&db));
    let group_repo = GroupRepository::new(Arc::clone(&db));
    let permission_repo = PermissionRepository::new(Arc::clone(&db));

    // Initialize services
    let access_service = AccessService::new(permission_repo.clone(), group_repo.clone());
    let group_service = GroupService::new(
        group_repo.clone(),
        permission_repo.clone(),
        access_service.clone(),
    );
    let membership_service = MembershipService::new(group_repo.clone(), access_service.clone());
    let permission_service =
        PermissionService::new(permission_repo.clone(), access_service.clone());

    // Create app state
    let state = AppState {
        access_service,
        group_service,
        membership_service,
        permission_service,
        user_repo,
    };

    // Build router
    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            lernio_api::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
