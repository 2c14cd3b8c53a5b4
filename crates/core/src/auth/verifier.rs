use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{constant_time_eq, verify_secret, AuthError, CredentialVerifier, Credentials, SessionUser};
use crate::config::AuthConfig;
use crate::user::{NewUser, Role, UserStore};

/// Verifies credentials against the user store.
///
/// Two legacy behaviours are opt-in through [`AuthConfig`]: a shared
/// fallback password accepted for any active user, and creation of unknown
/// users on first login.
pub struct DirectoryVerifier {
    users: Arc<dyn UserStore>,
    fallback_password: Option<String>,
    auto_provision: bool,
}

impl DirectoryVerifier {
    pub fn new(users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        Self {
            users,
            fallback_password: config.fallback_password.clone().filter(|p| !p.is_empty()),
            auto_provision: config.auto_provision,
        }
    }

    fn fallback_matches(&self, password: &str) -> bool {
        self.fallback_password
            .as_deref()
            .is_some_and(|fallback| constant_time_eq(fallback.as_bytes(), password.as_bytes()))
    }
}

#[async_trait]
impl CredentialVerifier for DirectoryVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<SessionUser, AuthError> {
        let username = credentials.username.trim();
        if username.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let user = match self.users.find_by_username(username)? {
            Some(user) => {
                if !user.is_active {
                    debug!(username, "Login rejected, user inactive");
                    return Err(AuthError::Inactive);
                }
                if verify_secret(&credentials.password, &user.password_secret) {
                    user
                } else if self.fallback_matches(&credentials.password) {
                    warn!(username, "Login accepted with fallback password");
                    user
                } else {
                    debug!(username, "Login rejected, wrong password");
                    return Err(AuthError::InvalidCredentials);
                }
            }
            None if self.auto_provision => {
                let user = self.users.create(NewUser {
                    username: username.to_string(),
                    display_name: username.to_string(),
                    role: Role::Dispatcher,
                    password: credentials.password.clone(),
                })?;
                info!(user_id = user.id, username, "Provisioned user on first login");
                user
            }
            None => {
                debug!(username, "Login rejected, unknown user");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let user = self.users.record_login(user.id)?;
        info!(user_id = user.id, username = %user.username, "User logged in");
        Ok(SessionUser::from(user))
    }

    fn method_name(&self) -> &'static str {
        "directory"
    }
}
