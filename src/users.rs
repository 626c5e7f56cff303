//! User registration and lookup.

use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::auth::{self, AuthError};
use crate::models::User;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Email already registered")]
    EmailTaken,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
    }
}

/// Register a new user. Emails are unique; a second registration fails
/// with [`UserError::EmailTaken`].
pub async fn create_user(pool: &SqlitePool, email: &str, password: &str) -> Result<User, UserError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(UserError::Invalid("email must not be empty".into()));
    }
    if password.is_empty() {
        return Err(UserError::Invalid("password must not be empty".into()));
    }

    let hashed = auth::hash_password(password)?;

    let result = sqlx::query(
        "INSERT INTO users (email, hashed_password) VALUES (?, ?) RETURNING id, email, hashed_password",
    )
    .bind(email)
    .bind(&hashed)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => {
            let user = row_to_user(&row);
            info!(user_id = user.id, "registered user");
            Ok(user)
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(UserError::EmailTaken)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, email, hashed_password FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_user))
}

/// Check credentials. Returns `None` for an unknown email or a wrong password.
pub async fn authenticate(
    pool: &SqlitePool,
    email: &str,
    password: &str,
) -> Result<Option<User>, sqlx::Error> {
    let user = find_by_email(pool, email.trim()).await?;
    Ok(user.filter(|u| auth::verify_password(password, &u.hashed_password)))
}
