//! Core business logic for lernio.
//!
//! The access-control engine: pure decision functions over group memberships
//! and permission grants, plus the lifecycle operations that mutate them.
//! All state lives behind the repository layer; services are instantiated per
//! process with nothing but repository handles.

pub mod caller;
pub mod services;

pub use caller::Caller;
pub use services::*;
