use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserError;

/// What a user may do at the desk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Fulfils tickets. Accepts the legacy Spanish spelling on input.
    #[serde(alias = "despachador")]
    Dispatcher,
    Supervisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dispatcher => "dispatcher",
            Role::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispatcher" | "despachador" => Ok(Role::Dispatcher),
            "supervisor" => Ok(Role::Supervisor),
            other => Err(UserError::Validation(format!("invalid role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    /// Opaque secret, never sent to clients.
    #[serde(skip)]
    pub password_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Request to create a user. `password` is plaintext and hashed by the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub password: String,
}

impl NewUser {
    pub(crate) fn validate(&self) -> Result<(), UserError> {
        if self.username.trim().is_empty() {
            return Err(UserError::Validation("username is required".to_string()));
        }
        if self.display_name.trim().is_empty() {
            return Err(UserError::Validation("displayName is required".to_string()));
        }
        if self.password.is_empty() {
            return Err(UserError::Validation("password is required".to_string()));
        }
        Ok(())
    }
}

/// Partial update of a user; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.role.is_none()
            && self.is_active.is_none()
            && self.password.is_none()
    }
}
