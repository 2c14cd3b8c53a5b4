//! Login and logout.
//!
//! The server is stateless: a successful login returns the session user and
//! the client keeps it. Logout only acknowledges.

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;
use tracing::{info, warn};

use despacho_core::{AuthError, Credentials, SessionUser};

use super::response::{ApiError, ApiJson, ApiResponse};
use crate::metrics::LOGIN_FAILURES_TOTAL;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: SessionUser,
    pub remember: bool,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    match state.verifier().verify(&credentials).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, "Login succeeded");
            Ok(ApiResponse::ok(LoginResponse {
                user,
                remember: credentials.remember,
            }))
        }
        Err(e) => {
            let reason = match &e {
                AuthError::MissingCredentials => "missing_credentials",
                AuthError::InvalidCredentials => "invalid_credentials",
                AuthError::Inactive => "inactive",
                AuthError::Storage(_) => "internal_error",
            };
            LOGIN_FAILURES_TOTAL.with_label_values(&[reason]).inc();
            warn!(username = %credentials.username, reason, "Login failed");
            Err(e.into())
        }
    }
}

pub async fn logout() -> ApiResponse<()> {
    ApiResponse::message("Logged out")
}
