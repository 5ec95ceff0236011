//! User directory business logic.
//!
//! Handles registration, credential checks and profile management on top of
//! the user repository.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::api::common::validation_message;
use crate::auth::models::{ListUsersQuery, RegisterRequest, UpdateUserRequest, UserStatsResponse};
use crate::database::models::{CreateUser, User};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::user_repository::UserRepository;
use crate::utils::password::PasswordHasher;

pub struct UserService<'a> {
    /// Shared database connection pool
    pool: &'a SqlitePool,
    hasher: PasswordHasher,
}

impl<'a> UserService<'a> {
    /// Creates a new UserService instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            hasher: PasswordHasher::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_hasher(pool: &'a SqlitePool, hasher: PasswordHasher) -> Self {
        Self { pool, hasher }
    }

    /// Registers a new user.
    ///
    /// # Arguments
    /// * `request` - Registration data transfer object
    ///
    /// # Returns
    /// The newly created User with all fields populated
    ///
    /// # Errors
    /// Returns `ServiceError` for:
    /// - Validation failures
    /// - Email or username already taken
    pub async fn create_user(&self, request: RegisterRequest) -> ServiceResult<User> {
        if let Err(validation_errors) = request.validate() {
            return Err(ServiceError::validation(validation_message(
                validation_errors,
            )));
        }

        let repo = UserRepository::new(self.pool);

        if repo.email_exists(&request.email).await? {
            return Err(ServiceError::already_exists("User", &request.email));
        }
        if repo.username_exists(&request.username).await? {
            return Err(ServiceError::already_exists("User", &request.username));
        }

        let password_hash = self.hasher.hash(&request.password)?;

        let data = CreateUser {
            id: Uuid::now_v7().to_string(),
            email: request.email,
            username: request.username,
            full_name: request.full_name,
            password_hash,
        };

        match repo.create_user(data).await {
            Ok(user) => Ok(user),
            Err(e) => Err(map_unique_violation(e)),
        }
    }

    /// Checks a username/password pair and stamps the login time.
    ///
    /// # Returns
    /// The authenticated User with its last-login timestamp updated
    ///
    /// # Errors
    /// Returns the same generic `ServiceError::Unauthorized` whether the
    /// username is unknown or the password is wrong.
    pub async fn authenticate_user(&self, username: &str, password: &str) -> ServiceResult<User> {
        let repo = UserRepository::new(self.pool);

        let user = match repo.get_user_by_username(username).await? {
            Some(user) => user,
            None => {
                return Err(ServiceError::unauthorized("Incorrect username or password"));
            }
        };

        if !self.hasher.verify(password, &user.password_hash)? {
            return Err(ServiceError::unauthorized("Incorrect username or password"));
        }

        let now = Utc::now();
        repo.record_login(&user.id, now).await?;

        Ok(User {
            last_login: Some(now),
            ..user
        })
    }

    /// Retrieves a user by ID with existence verification.
    ///
    /// # Errors
    /// Returns `ServiceError::Validation` for a malformed identifier and
    /// `ServiceError::NotFound` if no user has this ID.
    pub async fn get_user_required(&self, id: &str) -> ServiceResult<User> {
        if Uuid::parse_str(id).is_err() {
            return Err(ServiceError::validation("Invalid user ID format"));
        }

        let repo = UserRepository::new(self.pool);
        let user = repo
            .get_user_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", id))?;
        Ok(user)
    }

    /// Retrieves a page of users plus the total count of the filtered set.
    pub async fn list_users(&self, query: &ListUsersQuery) -> ServiceResult<(Vec<User>, i64)> {
        if let Err(validation_errors) = query.validate() {
            return Err(ServiceError::validation(validation_message(
                validation_errors,
            )));
        }

        let repo = UserRepository::new(self.pool);
        let total = repo.count_users(query.is_active).await?;
        let users = repo
            .list_users(query.is_active, query.limit(), query.skip())
            .await?;

        Ok((users, total))
    }

    /// Applies a partial update to a user.
    ///
    /// # Errors
    /// Returns `ServiceError` for:
    /// - Validation failures or a malformed identifier
    /// - Unknown user ID
    /// - Email or username already taken by another user
    pub async fn update_user(&self, id: &str, changes: UpdateUserRequest) -> ServiceResult<User> {
        if let Err(validation_errors) = changes.validate() {
            return Err(ServiceError::validation(validation_message(
                validation_errors,
            )));
        }

        let mut user = self.get_user_required(id).await?;
        let repo = UserRepository::new(self.pool);

        if let Some(email) = &changes.email {
            if email != &user.email && repo.email_exists_excluding(email, id).await? {
                return Err(ServiceError::already_exists("User", email));
            }
        }
        if let Some(username) = &changes.username {
            if username != &user.username && repo.username_exists_excluding(username, id).await? {
                return Err(ServiceError::already_exists("User", username));
            }
        }

        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(full_name) = changes.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(is_active) = changes.is_active {
            user.is_active = is_active;
        }
        user.updated_at = Utc::now();

        match repo.update_user(&user).await {
            Ok(updated) => Ok(updated),
            Err(e) => Err(map_unique_violation(e)),
        }
    }

    /// Hard-deletes a user.
    ///
    /// # Errors
    /// Returns `ServiceError::Validation` for a malformed identifier and
    /// `ServiceError::NotFound` if no user has this ID.
    pub async fn delete_user(&self, id: &str) -> ServiceResult<()> {
        if Uuid::parse_str(id).is_err() {
            return Err(ServiceError::validation("Invalid user ID format"));
        }

        let repo = UserRepository::new(self.pool);
        if !repo.delete_user(id).await? {
            return Err(ServiceError::not_found("User", id));
        }

        Ok(())
    }

    /// Aggregate account counts. Inactive is derived from the two stored
    /// counts rather than queried separately.
    pub async fn user_stats(&self) -> ServiceResult<UserStatsResponse> {
        let repo = UserRepository::new(self.pool);
        let total = repo.count_users(None).await?;
        let active = repo.count_users(Some(true)).await?;

        Ok(UserStatsResponse {
            total_users: total,
            active_users: active,
            inactive_users: total - active,
        })
    }
}

/// The UNIQUE indexes are the source of truth for email/username uniqueness;
/// the exists-checks in this service only produce friendlier errors.
fn map_unique_violation(e: anyhow::Error) -> ServiceError {
    match e.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            ServiceError::already_exists("User", "email or username")
        }
        _ => ServiceError::from(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::password::PasswordHasher;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        pool
    }

    fn service(pool: &SqlitePool) -> UserService<'_> {
        UserService::with_hasher(pool, PasswordHasher::new().with_bcrypt_cost(4))
    }

    fn register_request(email: &str, username: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            username: username.to_string(),
            full_name: None,
            password: "pw12345".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_sets_initial_state() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let user = service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();

        assert!(user.is_active);
        assert!(user.last_login.is_none());
        assert_eq!(user.created_at, user.updated_at);
        assert!(Uuid::parse_str(&user.id).is_ok());
        // Stored hash is tagged, never the plaintext.
        assert_ne!(user.password_hash, "pw12345");
        assert!(user.password_hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let pool = setup_pool().await;
        let service = service(&pool);

        service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();
        let err = service
            .create_user(register_request("a@x.com", "bob"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_register_duplicate_username_conflicts() {
        let pool = setup_pool().await;
        let service = service(&pool);

        service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();
        let err = service
            .create_user(register_request("b@x.com", "alice"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_email() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let err = service
            .create_user(register_request("not-an-email", "alice"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_updates_last_login() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let created = service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();
        let user = service.authenticate_user("alice", "pw12345").await.unwrap();

        assert_eq!(user.id, created.id);
        assert!(user.last_login.is_some());

        let stored = service.get_user_required(&created.id).await.unwrap();
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn test_authenticate_failures_are_generic() {
        let pool = setup_pool().await;
        let service = service(&pool);

        service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();

        let wrong_password = service
            .authenticate_user("alice", "wrong")
            .await
            .unwrap_err();
        let unknown_user = service
            .authenticate_user("mallory", "pw12345")
            .await
            .unwrap_err();

        // Neither outcome reveals which check failed.
        assert!(matches!(wrong_password, ServiceError::Unauthorized { .. }));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_get_user_rejects_malformed_id() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let err = service.get_user_required("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));

        let missing = Uuid::now_v7().to_string();
        let err = service.get_user_required(&missing).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_users_pagination() {
        let pool = setup_pool().await;
        let service = service(&pool);

        for i in 0..5 {
            service
                .create_user(register_request(
                    &format!("user{i}@x.com"),
                    &format!("user{i}"),
                ))
                .await
                .unwrap();
        }

        let query = ListUsersQuery {
            is_active: None,
            skip: Some(0),
            limit: Some(2),
        };
        let (users, total) = service.list_users(&query).await.unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(total, 5);
        // Newest first.
        assert_eq!(users[0].username, "user4");

        let query = ListUsersQuery {
            is_active: None,
            skip: Some(4),
            limit: Some(2),
        };
        let (users, total) = service.list_users(&query).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(total, 5);
        assert_eq!(users[0].username, "user0");
    }

    #[tokio::test]
    async fn test_list_users_active_filter() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let mut ids = Vec::new();
        for i in 0..3 {
            let user = service
                .create_user(register_request(
                    &format!("user{i}@x.com"),
                    &format!("user{i}"),
                ))
                .await
                .unwrap();
            ids.push(user.id);
        }

        let changes = UpdateUserRequest {
            email: None,
            username: None,
            full_name: None,
            is_active: Some(false),
        };
        service.update_user(&ids[0], changes).await.unwrap();

        let query = ListUsersQuery {
            is_active: Some(false),
            skip: None,
            limit: None,
        };
        let (users, total) = service.list_users(&query).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(total, 1);
        assert_eq!(users[0].id, ids[0]);

        let query = ListUsersQuery {
            is_active: Some(true),
            skip: None,
            limit: None,
        };
        let (_, total) = service.list_users(&query).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_list_users_rejects_oversized_limit() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let query = ListUsersQuery {
            is_active: None,
            skip: None,
            limit: Some(500),
        };
        let err = service.list_users(&query).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_changes_only_supplied_fields() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let user = service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();

        let changes = UpdateUserRequest {
            email: None,
            username: None,
            full_name: Some("Alice Example".to_string()),
            is_active: None,
        };
        let updated = service.update_user(&user.id, changes).await.unwrap();

        assert_eq!(updated.email, "a@x.com");
        assert_eq!(updated.username, "alice");
        assert_eq!(updated.full_name.as_deref(), Some("Alice Example"));
        assert!(updated.is_active);
        assert!(updated.updated_at > user.updated_at);
    }

    #[tokio::test]
    async fn test_update_conflict_leaves_target_unmodified() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let alice = service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();
        service
            .create_user(register_request("b@x.com", "bob"))
            .await
            .unwrap();

        let changes = UpdateUserRequest {
            email: Some("b@x.com".to_string()),
            username: None,
            full_name: None,
            is_active: None,
        };
        let err = service.update_user(&alice.id, changes).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists { .. }));

        let stored = service.get_user_required(&alice.id).await.unwrap();
        assert_eq!(stored.email, "a@x.com");
        assert_eq!(stored.updated_at, alice.updated_at);
    }

    #[tokio::test]
    async fn test_update_unknown_user_not_found() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let changes = UpdateUserRequest {
            email: None,
            username: None,
            full_name: None,
            is_active: Some(false),
        };
        let err = service
            .update_user(&Uuid::now_v7().to_string(), changes)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_user_is_hard() {
        let pool = setup_pool().await;
        let service = service(&pool);

        let user = service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();

        service.delete_user(&user.id).await.unwrap();

        let err = service.get_user_required(&user.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));

        let err = service.delete_user(&user.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));

        // The username is free for a new registration.
        service
            .create_user(register_request("a@x.com", "alice"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_stats() {
        let pool = setup_pool().await;
        let service = service(&pool);

        for i in 0..4 {
            service
                .create_user(register_request(
                    &format!("user{i}@x.com"),
                    &format!("user{i}"),
                ))
                .await
                .unwrap();
        }
        let query = ListUsersQuery::default();
        let (users, _) = service.list_users(&query).await.unwrap();
        let changes = UpdateUserRequest {
            email: None,
            username: None,
            full_name: None,
            is_active: Some(false),
        };
        service.update_user(&users[0].id, changes).await.unwrap();

        let stats = service.user_stats().await.unwrap();
        assert_eq!(stats.total_users, 4);
        assert_eq!(stats.active_users, 3);
        assert_eq!(stats.inactive_users, 1);
    }
}
