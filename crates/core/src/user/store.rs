use thiserror::Error;

use super::{NewUser, Role, User, UserPatch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),

    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    #[error("User not found: {0}")]
    NotFound(i64),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Id to username lookup, used to cache names on tickets.
pub trait UserDirectory: Send + Sync {
    /// Username for `id`, or `None` when no such user exists.
    fn username_of(&self, id: i64) -> Result<Option<String>, UserError>;
}

/// Trait for user storage backends. Users are soft-deleted only.
pub trait UserStore: UserDirectory {
    fn get(&self, id: i64) -> Result<Option<User>, UserError>;

    fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError>;

    /// All users, optionally restricted to one role, ordered by id.
    fn list(&self, role: Option<Role>) -> Result<Vec<User>, UserError>;

    fn create(&self, user: NewUser) -> Result<User, UserError>;

    fn update(&self, id: i64, patch: UserPatch) -> Result<User, UserError>;

    /// Mark a user inactive. Tickets keep their cached username.
    fn deactivate(&self, id: i64) -> Result<User, UserError>;

    fn record_login(&self, id: i64) -> Result<User, UserError>;

    /// Create the two default accounts when there are no users at all.
    /// Returns how many accounts were created.
    fn seed_defaults(&self, password: &str) -> Result<usize, UserError>;
}
