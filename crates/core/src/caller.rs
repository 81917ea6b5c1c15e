//! Authenticated caller identity.

use lernio_db::entities::user::{self, UserRole};

/// The identity an operation is evaluated for: a user id plus the site-wide
/// role. Resolution of the identity itself (sessions, tokens) happens at the
/// transport boundary; the engine only consumes the result.
#[derive(Debug, Clone)]
pub struct Caller {
    /// The acting user.
    pub user_id: String,
    /// Site-wide role of the acting user.
    pub site_role: UserRole,
}

impl Caller {
    /// Create a caller from its parts.
    #[must_use]
    pub fn new(user_id: impl Into<String>, site_role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            site_role,
        }
    }

    /// Build the caller for a resolved user row.
    #[must_use]
    pub fn from_user(user: &user::Model) -> Self {
        Self {
            user_id: user.id.clone(),
            site_role: user.site_role,
        }
    }

    /// Site admins bypass every group-derived check.
    #[must_use]
    pub const fn is_site_admin(&self) -> bool {
        self.site_role.is_admin()
    }
}
