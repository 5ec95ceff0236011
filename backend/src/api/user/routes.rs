//! Defines the HTTP routes for user profile and management.
//!
//! These routes provide endpoints for listing, reading and updating user
//! accounts. The whole router sits behind the JWT guard.

use super::handlers::{delete_user, get_user, list_users, update_user, user_stats};
use crate::auth::middleware::jwt_auth;
use axum::{Router, middleware, routing::get};

pub fn user_router() -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/stats", get(user_stats))
        .route(
            "/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .layer(middleware::from_fn(jwt_auth))
}
