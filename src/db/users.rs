//! User accounts.

use super::{Database, User};
use crate::auth::{hash_password, verify_password};
use crate::error::{AppError, Result};
use rusqlite::{OptionalExtension, params};
use std::sync::LazyLock;

const UNKNOWN_USER_PASSWORD: &str = "comic-opds-unknown-user";

/// Hash checked when the user does not exist, so lookups cost the same.
static UNKNOWN_USER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password(UNKNOWN_USER_PASSWORD).ok());

impl Database {
    /// Create a user.
    pub fn add_user(&self, name: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(AppError::EmptyPassword);
        }
        let pass = hash_password(password)?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (name, pass) VALUES (?1, ?2)",
            params![name, pass],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::UserExists(name.to_string())
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;

        tracing::info!(user = %name, "User created");
        Ok(())
    }

    /// Delete a user. The last remaining user cannot be deleted.
    pub fn delete_user(&self, name: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT name FROM users WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AppError::UserNotFound(name.to_string()));
        }

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if count <= 1 {
            return Err(AppError::NotEnoughUsers);
        }

        tx.execute("DELETE FROM users WHERE name = ?1", params![name])?;
        tx.commit()?;

        tracing::info!(user = %name, "User deleted");
        Ok(())
    }

    /// Rename a user. Renaming to the current name is a no-op.
    pub fn change_username(&self, name: &str, new_name: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT name FROM users WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AppError::UserNotFound(name.to_string()));
        }
        if name == new_name {
            return Ok(());
        }

        let taken: Option<String> = tx
            .query_row(
                "SELECT name FROM users WHERE name = ?1",
                params![new_name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(AppError::UserExists(new_name.to_string()));
        }

        tx.execute(
            "UPDATE users SET name = ?1 WHERE name = ?2",
            params![new_name, name],
        )?;
        tx.commit()?;

        tracing::info!(user = %name, new_name = %new_name, "User renamed");
        Ok(())
    }

    /// Replace a user's password.
    pub fn change_password(&self, name: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(AppError::EmptyPassword);
        }
        let pass = hash_password(password)?;

        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE users SET pass = ?1 WHERE name = ?2",
            params![pass, name],
        )?;
        if rows == 0 {
            return Err(AppError::UserNotFound(name.to_string()));
        }

        tracing::info!(user = %name, "Password changed");
        Ok(())
    }

    /// Check credentials. Unknown users and wrong passwords are
    /// indistinguishable.
    pub fn authenticate(&self, name: &str, password: &str) -> Result<bool> {
        match self.get_user(name)? {
            Some(user) => verify_password(password, &user.pass),
            None => {
                // Burn the same Argon2 work a real check costs.
                if let Some(hash) = UNKNOWN_USER_HASH.as_deref() {
                    let _ = verify_password(password, hash);
                }
                Ok(false)
            }
        }
    }

    /// Get user by name.
    pub fn get_user(&self, name: &str) -> Result<Option<User>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT name, pass FROM users WHERE name = ?1",
            params![name],
            |row| {
                Ok(User {
                    name: row.get(0)?,
                    pass: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name, pass FROM users ORDER BY name")?;

        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    name: row.get(0)?,
                    pass: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Number of users.
    pub fn user_count(&self) -> Result<i64> {
        let conn = self.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}
