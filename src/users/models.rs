use std::str::FromStr;

use argon2::Config;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{Postgres, Transaction};

use crate::db;
use crate::errors::{FieldErrors, ServiceError};

text_enum! {
    /// Access level of a user, the api only exposes routes matching the role
    pub enum Role {
        Player => "player",
        Owner => "owner",
        QueueMaster => "queue_master",
        Superadmin => "superadmin",
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Player
    }
}

#[derive(Serialize, Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user that is about to be stored, the password is already hashed
#[derive(Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserFilter {
    /// filter users by %name% or %email%
    pub search: Option<String>,
    pub role: Option<Role>,
}

/// **PATCH /api/admin/users/{id}/role**
#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: Role,
}

impl User {
    /// The role of this user, unknown roles lose all privileges
    pub fn role(&self) -> Role {
        Role::from_str(&self.role).unwrap_or_default()
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role())
    }

    pub fn is_superadmin(&self) -> bool {
        self.role() == Role::Superadmin
    }

    #[tracing::instrument(name = "User::find", skip(db))]
    pub async fn find(id: i64, db: &db::Pool) -> Result<Self, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await?;

        Ok(user)
    }

    #[tracing::instrument(name = "User::find_by_email", skip(db))]
    pub async fn find_by_email(email: &str, db: &db::Pool) -> Result<Option<Self>, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(db)
            .await?;

        Ok(user)
    }

    #[tracing::instrument(name = "User::find_all", skip(db))]
    pub async fn find_all(filter: UserFilter, db: &db::Pool) -> Result<Vec<Self>, ServiceError> {
        let role = filter.role.map(|role| role.as_str());

        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR email ILIKE '%' || $1 || '%')
            AND ($2::text IS NULL OR role = $2)
            ORDER BY name, id",
        )
        .bind(filter.search)
        .bind(role)
        .fetch_all(db)
        .await?;

        Ok(users)
    }

    #[tracing::instrument(name = "User::create", skip(user, db))]
    pub async fn create(user: NewUser, db: &db::Pool) -> Result<Self, ServiceError> {
        let res = sqlx::query_as::<_, User>(
            "INSERT INTO users (name, email, password, role, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(user.name.trim())
        .bind(user.email.trim())
        .bind(&user.password)
        .bind(user.role.as_str())
        .bind(user.phone)
        .fetch_one(db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(err) => match ServiceError::from(err) {
                ServiceError::Conflict(_) => Err(ServiceError::Validation(FieldErrors::single(
                    "email",
                    "the email has already been taken",
                ))),
                err => Err(err),
            },
        }
    }

    /// Store a new (already hashed) password
    #[tracing::instrument(name = "User::update_password", skip(password, tx))]
    pub async fn update_password(
        id: i64,
        password: &str,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2")
            .bind(password)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "User::update_role", skip(db))]
    pub async fn update_role(id: i64, role: Role, db: &db::Pool) -> Result<Self, ServiceError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(role.as_str())
        .bind(id)
        .fetch_one(db)
        .await?;

        Ok(user)
    }

    pub async fn count(db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users")
            .fetch_one(db)
            .await?;

        Ok(count)
    }

    /// argon2 is slow on purpose, call this from a blocking context
    pub fn hash_password(password: &str) -> Result<String, ServiceError> {
        let salt: [u8; 32] = rand::thread_rng().gen();
        let config = Config::default();

        let hash = argon2::hash_encoded(password.as_bytes(), &salt, &config)?;

        Ok(hash)
    }

    /// returns Unauthorized when the password doesn't match
    pub fn verify_password(&self, password: &[u8]) -> Result<(), ServiceError> {
        let is_match = argon2::verify_encoded(&self.password, password)?;

        if !is_match {
            return Err(ServiceError::Unauthorized);
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn user(id: i64, role: Role) -> User {
        User {
            id,
            name: format!("user {}", id),
            email: format!("user{}@example.com", id),
            password: String::new(),
            role: role.to_string(),
            phone: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    /// the user password should never be exposed through the api
    fn password_should_not_leak() {
        let mut user = user(1, Role::Player);
        user.password = String::from("super-secret-hash");

        let serialized = serde_json::to_string(&user).unwrap();

        assert_eq!(serialized.contains("super-secret-hash"), false);
        assert!(serialized.contains(r#""role":"player""#));
    }

    #[test]
    fn incorrect_password() {
        let mut user = user(1, Role::Superadmin);
        user.password = User::hash_password("admin-password").unwrap();

        assert!(user.verify_password(b"admin-password").is_ok());
        assert_eq!(
            user.verify_password(b"not-admin"),
            Err(ServiceError::Unauthorized)
        );
    }

    #[test]
    fn roles() {
        let owner = user(2, Role::Owner);
        assert!(owner.has_role(&[Role::Owner, Role::Superadmin]));
        assert!(!owner.has_role(&[Role::QueueMaster]));
        assert!(!owner.is_superadmin());

        let mut unknown = user(3, Role::Owner);
        unknown.role = String::from("janitor");
        assert_eq!(unknown.role(), Role::Player);
    }

    #[test]
    fn role_text() {
        assert_eq!(Role::QueueMaster.as_str(), "queue_master");
        assert_eq!(Role::from_str("superadmin"), Ok(Role::Superadmin));
        assert_eq!(
            serde_json::from_str::<Role>(r#""queue_master""#).unwrap(),
            Role::QueueMaster
        );
    }
}
