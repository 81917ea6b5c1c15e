//! HTTP API layer for lernio.
//!
//! A thin axum binding of the access-control operations:
//!
//! - **Endpoints**: one route per group/membership/permission operation
//! - **Extractors**: bearer-token authentication
//! - **Middleware**: caller resolution, application state

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
