//! Middleware for protecting authenticated routes.
//!
//! This module validates the bearer token on inbound requests and attaches
//! the resolved account to request extensions for use in handlers. Every
//! failure surfaces as a bare 401.

use crate::auth::models::CurrentUser;
use crate::auth::service::AuthService;
use crate::config::Config;
use axum::{
    extract::{Extension, Request},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use sqlx::SqlitePool;

/// JWT authentication middleware
pub async fn jwt_auth(
    Extension(pool): Extension<SqlitePool>,
    Extension(config): Extension<Config>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Check if it's a Bearer token
    if !auth_header.starts_with("Bearer ") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = &auth_header[7..]; // Remove "Bearer " prefix

    let auth_service =
        AuthService::new(&pool, &config).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match auth_service.authenticate_token(token).await {
        Ok(user) => {
            // Make the account available to handlers downstream
            request.extensions_mut().insert(CurrentUser(user));
            Ok(next.run(request).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}
