//! Database repository for user account persistence.
//!
//! Provides CRUD operations for registered users. Email and username
//! uniqueness is ultimately enforced by the UNIQUE indexes on the table;
//! the exists-checks here are a fast path for friendlier conflict errors.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{CreateUser, User};

const USER_COLUMNS: &str =
    "id, email, username, full_name, is_active, password_hash, created_at, updated_at, last_login";

/// Repository for user database operations.
pub struct UserRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Creates a new UserRepository instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new user row.
    ///
    /// # Arguments
    /// * `user` - CreateUser DTO with a generated id and hashed password
    ///
    /// # Returns
    /// The newly created User with all fields populated
    pub async fn create_user(&self, user: CreateUser) -> Result<User> {
        let now = Utc::now();
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, username, full_name, is_active, password_hash, created_at, updated_at, last_login)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(true)
        .bind(&user.password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(created)
    }

    /// Retrieves a user by their unique identifier.
    ///
    /// # Returns
    /// `Some(User)` if found, `None` otherwise
    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Retrieves a user by their username.
    ///
    /// # Returns
    /// `Some(User)` if found, `None` otherwise
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Checks if an email already exists in the system.
    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(self.pool)
            .await?;

        Ok(count > 0)
    }

    /// Checks if a username already exists in the system.
    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(self.pool)
            .await?;

        Ok(count > 0)
    }

    /// Checks if email exists on a user other than `exclude_user_id`.
    pub async fn email_exists_excluding(&self, email: &str, exclude_user_id: &str) -> Result<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
                .bind(email)
                .bind(exclude_user_id)
                .fetch_one(self.pool)
                .await?;

        Ok(count > 0)
    }

    /// Checks if username exists on a user other than `exclude_user_id`.
    pub async fn username_exists_excluding(
        &self,
        username: &str,
        exclude_user_id: &str,
    ) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE username = ? AND id != ?",
        )
        .bind(username)
        .bind(exclude_user_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Retrieves a page of users, newest first, optionally filtered by the
    /// active flag.
    pub async fn list_users(
        &self,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>> {
        let users = match is_active {
            Some(flag) => {
                sqlx::query_as::<_, User>(&format!(
                    r#"
                    SELECT {USER_COLUMNS} FROM users
                    WHERE is_active = ?
                    ORDER BY created_at DESC
                    LIMIT ? OFFSET ?
                    "#
                ))
                .bind(flag)
                .bind(limit)
                .bind(offset)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, User>(&format!(
                    r#"
                    SELECT {USER_COLUMNS} FROM users
                    ORDER BY created_at DESC
                    LIMIT ? OFFSET ?
                    "#
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(users)
    }

    /// Counts users, optionally filtered by the active flag. The count is
    /// independent of any pagination window.
    pub async fn count_users(&self, is_active: Option<bool>) -> Result<i64> {
        let count = match is_active {
            Some(flag) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE is_active = ?")
                    .bind(flag)
                    .fetch_one(self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                    .fetch_one(self.pool)
                    .await?
            }
        };

        Ok(count)
    }

    /// Writes a user's mutable profile fields back to the database.
    ///
    /// # Returns
    /// The updated User as stored
    pub async fn update_user(&self, user: &User) -> Result<User> {
        let updated = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = ?, username = ?, full_name = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.updated_at)
        .bind(&user.id)
        .fetch_one(self.pool)
        .await?;

        Ok(updated)
    }

    /// Stamps a user's last-login timestamp.
    pub async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Hard-deletes a user row.
    ///
    /// # Returns
    /// `true` if a row was removed
    pub async fn delete_user(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
