//! Core business logic for the authentication system.

use std::fmt;

use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::api::common::validation_message;
use crate::auth::models::{
    LoginRequest, RefreshTokenRequest, RegisterRequest, TokenResponse, UserResponse,
};
use crate::config::Config;
use crate::database::models::User;
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::user_repository::UserRepository;
use crate::services::user_service::UserService;
use crate::utils::jwt::TokenCodec;

/// Authentication service for registration, login, token issuance and the
/// bearer-token guard used by protected routes.
pub struct AuthService<'a> {
    pool: &'a SqlitePool,
    codec: TokenCodec,
    user_service: UserService<'a>,
}

/// Why a bearer token was rejected. Collapsed to one generic unauthorized
/// error at the service boundary so callers cannot tell which check failed.
#[derive(Debug, PartialEq, Eq)]
enum AuthFailure {
    BadToken,
    MissingSubject,
    MalformedSubject,
    UnknownAccount,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::BadToken => write!(f, "token failed verification"),
            AuthFailure::MissingSubject => write!(f, "missing subject claim"),
            AuthFailure::MalformedSubject => write!(f, "malformed subject claim"),
            AuthFailure::UnknownAccount => write!(f, "no matching account"),
        }
    }
}

impl<'a> AuthService<'a> {
    /// Create a new AuthService instance from the process configuration.
    pub fn new(pool: &'a SqlitePool, config: &Config) -> ServiceResult<Self> {
        Ok(AuthService {
            pool,
            codec: TokenCodec::new(config)?,
            user_service: UserService::new(pool),
        })
    }

    #[cfg(test)]
    fn with_user_service(
        pool: &'a SqlitePool,
        config: &Config,
        user_service: UserService<'a>,
    ) -> ServiceResult<Self> {
        Ok(AuthService {
            pool,
            codec: TokenCodec::new(config)?,
            user_service,
        })
    }

    /// Registers a new user account.
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<UserResponse> {
        let user = self.user_service.create_user(request).await?;
        tracing::info!(username = %user.username, email = %user.email, "User registered");
        Ok(UserResponse::from(user))
    }

    /// Authenticates credentials and issues a session token pair.
    pub async fn login(&self, request: LoginRequest) -> ServiceResult<TokenResponse> {
        if let Err(validation_errors) = request.validate() {
            return Err(ServiceError::validation(validation_message(
                validation_errors,
            )));
        }

        let user = self
            .user_service
            .authenticate_user(&request.username, &request.password)
            .await?;

        tracing::info!(username = %user.username, email = %user.email, "User logged in");
        self.issue_session_pair(&user)
    }

    /// Issues a fresh access/refresh pair for an authenticated account,
    /// embedding the account ID as subject and the username for convenience.
    pub fn issue_session_pair(&self, user: &User) -> ServiceResult<TokenResponse> {
        let access = self
            .codec
            .issue_access(&user.id, Some(&user.username), None)?;
        let refresh = self
            .codec
            .issue_refresh(&user.id, Some(&user.username), None)?;

        Ok(TokenResponse::bearer(access, refresh))
    }

    /// Rotates a refresh token into a new session pair. The old refresh
    /// token stays usable until it expires; there is no revocation store.
    ///
    /// # Errors
    /// Returns `ServiceError::Validation` if the token is not a refresh
    /// token, and a generic `ServiceError::Unauthorized` if it is invalid,
    /// its subject is unknown, or the account is inactive.
    pub async fn refresh_token(&self, request: RefreshTokenRequest) -> ServiceResult<TokenResponse> {
        let claims = self.codec.decode(&request.refresh_token)?;

        if !claims.is_refresh() {
            return Err(ServiceError::validation("Invalid refresh token"));
        }

        let user = match self.resolve_subject(claims.subject()).await {
            Ok(user) => user,
            Err(reason) => {
                tracing::debug!(%reason, "Refresh token rejected");
                return Err(ServiceError::unauthorized("Invalid token"));
            }
        };

        if !user.is_active {
            return Err(ServiceError::unauthorized("Invalid token"));
        }

        self.issue_session_pair(&user)
    }

    /// Resolves a bearer token to the account it represents. Every failure
    /// path - bad token, missing or malformed subject, unknown account -
    /// produces the same generic unauthorized error.
    pub async fn authenticate_token(&self, token: &str) -> ServiceResult<User> {
        match self.check_token(token).await {
            Ok(user) => Ok(user),
            Err(reason) => {
                tracing::debug!(%reason, "Bearer token rejected");
                Err(ServiceError::unauthorized("Invalid credentials"))
            }
        }
    }

    async fn check_token(&self, token: &str) -> Result<User, AuthFailure> {
        let claims = self
            .codec
            .decode(token)
            .map_err(|_| AuthFailure::BadToken)?;
        self.resolve_subject(claims.subject()).await
    }

    async fn resolve_subject(&self, subject: Option<&str>) -> Result<User, AuthFailure> {
        let subject = subject.ok_or(AuthFailure::MissingSubject)?;
        if Uuid::parse_str(subject).is_err() {
            return Err(AuthFailure::MalformedSubject);
        }

        let repo = UserRepository::new(self.pool);
        repo.get_user_by_id(subject)
            .await
            .map_err(|_| AuthFailure::UnknownAccount)?
            .ok_or(AuthFailure::UnknownAccount)
    }
}
