//! Shopper and administrator accounts.

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};

use super::ChatRepository;
use crate::models::{User, UserId};

/// Hash a password with Argon2id and a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

impl ChatRepository {
    /// Create a user with an argon2-hashed password.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        admin: bool,
    ) -> Result<User> {
        let password_hash = hash_password(password)?;
        let created_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, admin, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(&password_hash)
        .bind(admin)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create user '{}'", username))?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            admin,
            fcm_token: None,
            created_at,
        })
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, admin, fcm_token, created_at
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// The administrator account. If several rows carry the flag the oldest wins.
    pub async fn find_admin(&self) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, admin, fcm_token, created_at
             FROM users WHERE admin = 1 ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Store the device push token for a user. Returns false if no such user.
    pub async fn set_fcm_token(&self, id: UserId, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET fcm_token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update FCM token")?;
        Ok(result.rows_affected() > 0)
    }
}
