//! User directory endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode};

use despacho_core::{NewUser, Role, User, UserPatch};

use super::response::{ApiError, ApiJson, ApiPath, ApiResponse};
use crate::state::AppState;

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Vec<User>>, ApiError> {
    let users = state.users().list(None)?;
    let count = users.len();
    Ok(ApiResponse::ok(users).with_count(count))
}

pub async fn users_by_role(
    State(state): State<Arc<AppState>>,
    ApiPath(role): ApiPath<String>,
) -> Result<ApiResponse<Vec<User>>, ApiError> {
    let role = Role::from_str(&role)?;
    let users = state.users().list(Some(role))?;
    let count = users.len();
    Ok(ApiResponse::ok(users).with_count(count))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<User>, ApiError> {
    state
        .users()
        .get(id)?
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound(format!("User not found: {}", id)))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<NewUser>,
) -> Result<(StatusCode, ApiResponse<User>), ApiError> {
    let user = state.users().create(body)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(user).with_message("User created"),
    ))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<UserPatch>,
) -> Result<ApiResponse<User>, ApiError> {
    let user = state.users().update(id, patch)?;
    Ok(ApiResponse::ok(user).with_message("User updated"))
}

/// Soft delete: the account is deactivated, never removed.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<User>, ApiError> {
    let user = state.users().deactivate(id)?;
    Ok(ApiResponse::ok(user).with_message("User deactivated"))
}
