//! Handler functions for user profile and management API endpoints.
//!
//! These functions process requests for user data, interact with the service
//! layer, and return user-specific information. All of them sit behind the
//! bearer-token guard.

use crate::api::common::service_error_to_http;
use crate::auth::models::{
    ListUsersQuery, UpdateUserRequest, UserListResponse, UserResponse, UserStatsResponse,
};
use crate::services::user_service::UserService;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use sqlx::SqlitePool;

/// Lists users, newest first, with pagination and an optional active filter.
#[axum::debug_handler]
pub async fn list_users(
    Extension(pool): Extension<SqlitePool>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<UserListResponse>, (StatusCode, String)> {
    let user_service = UserService::new(&pool);
    let (users, total) = user_service
        .list_users(&query)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
        total,
        skip: query.skip(),
        limit: query.limit(),
    }))
}

/// Retrieves a user by its ID.
#[axum::debug_handler]
pub async fn get_user(
    Extension(pool): Extension<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let user_service = UserService::new(&pool);
    let user = user_service
        .get_user_required(&id)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(UserResponse::from(user)))
}

/// Applies a partial update to a user.
#[axum::debug_handler]
pub async fn update_user(
    Extension(pool): Extension<SqlitePool>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    tracing::info!("Updating user: {}", id);

    let user_service = UserService::new(&pool);
    let user = user_service
        .update_user(&id, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(UserResponse::from(user)))
}

/// Hard-deletes a user.
#[axum::debug_handler]
pub async fn delete_user(
    Extension(pool): Extension<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    tracing::info!("Deleting user: {}", id);

    let user_service = UserService::new(&pool);
    user_service
        .delete_user(&id)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(serde_json::json!({
        "message": "User deleted successfully"
    })))
}

/// Aggregate account counts.
#[axum::debug_handler]
pub async fn user_stats(
    Extension(pool): Extension<SqlitePool>,
) -> Result<Json<UserStatsResponse>, (StatusCode, String)> {
    let user_service = UserService::new(&pool);
    let stats = user_service
        .user_stats()
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(stats))
}
