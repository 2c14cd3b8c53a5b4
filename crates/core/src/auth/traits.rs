use async_trait::async_trait;
use thiserror::Error;

use super::types::{Credentials, SessionUser};
use crate::user::UserError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User account is inactive")]
    Inactive,

    #[error("Authentication storage error: {0}")]
    Storage(String),
}

impl From<UserError> for AuthError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::Storage(msg) => AuthError::Storage(msg),
            UserError::NotFound(_) => AuthError::InvalidCredentials,
            other => AuthError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify credentials and return the logged-in user.
    async fn verify(&self, credentials: &Credentials) -> Result<SessionUser, AuthError>;

    /// Name of this verification method
    fn method_name(&self) -> &'static str;
}
