//! Data structures for authentication-related entities.
//!
//! This module defines the request and response models for registration,
//! login, token refresh and user management, used for data transfer between
//! the HTTP layer and the service layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::models::User;

/// Registration request payload
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        email(message = "Must be a valid email"),
        length(max = 255, message = "Email too long")
    )]
    pub email: String,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Username must be between 1-255 characters"
    ))]
    pub username: String,

    #[validate(length(max = 255, message = "Full name too long"))]
    pub full_name: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login request payload
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Token pair returned by login and refresh
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// User projection returned by the API. Never includes the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login: user.last_login,
        }
    }
}

/// Partial user update; only supplied fields are changed.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(
        email(message = "Must be a valid email"),
        length(max = 255, message = "Email too long")
    )]
    pub email: Option<String>,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Username must be between 1-255 characters"
    ))]
    pub username: Option<String>,

    #[validate(length(max = 255, message = "Full name too long"))]
    pub full_name: Option<String>,

    pub is_active: Option<bool>,
}

/// Listing filter for user queries
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListUsersQuery {
    pub is_active: Option<bool>,

    #[validate(range(min = 0))]
    pub skip: Option<i64>,

    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

impl ListUsersQuery {
    /// Get skip with default
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0)
    }

    /// Get limit with default
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }
}

/// Paginated user listing
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

/// Aggregate account counts
#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    pub total_users: i64,
    pub active_users: i64,
    pub inactive_users: i64,
}

/// Authenticated account attached to the request by the auth middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);
