//! Data access repositories.
//!
//! Repositories are the storage boundary of the access-control engine. Every
//! multi-write operation (group creation, diff application, ownership
//! transfer) runs inside a single transaction so a partial failure leaves no
//! trace.

mod group;
mod permission;
mod user;

pub use group::{GroupRepository, MemberUpsert, PermissionUpsert};
pub use permission::PermissionRepository;
pub use user::UserRepository;

use lernio_common::AppError;
use sea_orm::TransactionError;

/// Flatten a transaction error into the application error.
pub(crate) fn tx_err(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(e) => AppError::Database(e.to_string()),
        TransactionError::Transaction(e) => e,
    }
}
