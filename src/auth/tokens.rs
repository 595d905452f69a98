use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Done, Postgres, Transaction};

use crate::config::Config;
use crate::db;
use crate::errors::ServiceError;
use crate::users::User;

const SECRET_LENGTH: usize = 40;

/// A personal access token, the secret itself is only known to the client
#[derive(Serialize, Debug, Clone, sqlx::FromRow)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Returned once, right after issuing a token
#[derive(Debug)]
pub struct PlainTextToken {
    pub access_token: AccessToken,
    pub plain_text: String,
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .collect()
}

/// Only the sha256 digest of a secret is stored
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Split a `{id}|{secret}` bearer token
pub fn split(token: &str) -> Option<(i64, &str)> {
    let mut parts = token.splitn(2, '|');
    let id = parts.next()?.parse::<i64>().ok()?;
    let secret = parts.next()?;

    if secret.len() != SECRET_LENGTH {
        return None;
    }

    Some((id, secret))
}

impl AccessToken {
    #[tracing::instrument(name = "AccessToken::issue", skip(db))]
    pub async fn issue(
        user_id: i64,
        name: &str,
        db: &db::Pool,
    ) -> Result<PlainTextToken, ServiceError> {
        let secret = generate_secret();

        let access_token = sqlx::query_as::<_, AccessToken>(
            "INSERT INTO access_tokens (user_id, name, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, name, last_used_at, expires_at, created_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(hash_secret(&secret))
        .bind(Utc::now() + Config::token_ttl())
        .fetch_one(db)
        .await?;

        let plain_text = format!("{}|{}", access_token.id, secret);

        Ok(PlainTextToken {
            access_token,
            plain_text,
        })
    }

    /// Resolve a bearer token to its user, every failure is reported as Unauthorized
    #[tracing::instrument(name = "AccessToken::find_user", skip(token, db))]
    pub async fn find_user(token: &str, db: &db::Pool) -> Result<User, ServiceError> {
        let (id, secret) = split(token).ok_or(ServiceError::Unauthorized)?;

        let user = sqlx::query_as::<_, User>(
            "SELECT users.* FROM access_tokens
            INNER JOIN users ON users.id = access_tokens.user_id
            WHERE access_tokens.id = $1
            AND access_tokens.token_hash = $2
            AND access_tokens.expires_at > NOW()",
        )
        .bind(id)
        .bind(hash_secret(secret))
        .fetch_optional(db)
        .await?
        .ok_or(ServiceError::Unauthorized)?;

        let touched = sqlx::query("UPDATE access_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await;

        if let Err(err) = touched {
            warn!("unable to update the last usage of token {}: {}", id, err);
        }

        Ok(user)
    }

    /// Delete the token, unknown tokens are ignored
    #[tracing::instrument(name = "AccessToken::revoke", skip(token, db))]
    pub async fn revoke(token: &str, db: &db::Pool) -> Result<(), ServiceError> {
        if let Some((id, secret)) = split(token) {
            sqlx::query("DELETE FROM access_tokens WHERE id = $1 AND token_hash = $2")
                .bind(id)
                .bind(hash_secret(secret))
                .execute(db)
                .await?;
        }

        Ok(())
    }

    /// Delete every token of a user, optionally keeping the one in use
    #[tracing::instrument(name = "AccessToken::revoke_all", skip(tx))]
    pub async fn revoke_all(
        user_id: i64,
        keep: Option<i64>,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<u64, ServiceError> {
        let res = sqlx::query(
            "DELETE FROM access_tokens WHERE user_id = $1 AND ($2::bigint IS NULL OR id <> $2)",
        )
        .bind(user_id)
        .bind(keep)
        .execute(&mut *tx)
        .await?;

        Ok(res.rows_affected())
    }
}

/// A one time token that allows a user to choose a new password
#[derive(Debug)]
pub struct PasswordResetToken;

impl PasswordResetToken {
    /// Create a reset token, replacing an older one, returns the secret
    #[tracing::instrument(name = "PasswordResetToken::create", skip(db))]
    pub async fn create(user_id: i64, db: &db::Pool) -> Result<String, ServiceError> {
        let secret = generate_secret();

        sqlx::query(
            "INSERT INTO password_resets (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET token_hash = EXCLUDED.token_hash, expires_at = EXCLUDED.expires_at, created_at = NOW()",
        )
        .bind(user_id)
        .bind(hash_secret(&secret))
        .bind(Utc::now() + Config::password_reset_ttl())
        .execute(db)
        .await?;

        Ok(secret)
    }

    /// Delete the reset token when it matches and hasn't expired
    ///
    /// returns false when the token is unknown, wrong or expired
    #[tracing::instrument(name = "PasswordResetToken::consume", skip(secret, tx))]
    pub async fn consume(
        user_id: i64,
        secret: &str,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<bool, ServiceError> {
        let res = sqlx::query(
            "DELETE FROM password_resets
            WHERE user_id = $1 AND token_hash = $2 AND expires_at > NOW()",
        )
        .bind(user_id)
        .bind(hash_secret(secret))
        .execute(&mut *tx)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
