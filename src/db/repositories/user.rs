use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use std::fmt;
use std::sync::LazyLock;
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::users;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

static EMAIL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

/// User data returned from the repository (without the password hash)
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub role: String,
    pub api_key: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            role: model.role,
            api_key: model.api_key,
            last_login: model.last_login,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug)]
pub enum CreateUserError {
    InvalidEmail(String),
    DuplicateEmail(String),
    Store(anyhow::Error),
}

impl fmt::Display for CreateUserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEmail(email) => write!(f, "Invalid email address: {email}"),
            Self::DuplicateEmail(_) => write!(f, "Email already registered"),
            Self::Store(e) => write!(f, "Failed to create user: {e}"),
        }
    }
}

impl std::error::Error for CreateUserError {}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create a user. The raw password is hashed here, on this write path,
    /// and nowhere else; the store never sees plaintext again.
    pub async fn create(
        &self,
        email: &str,
        raw_password: &str,
        role: &str,
        api_key: Option<String>,
        security: &SecurityConfig,
    ) -> Result<User, CreateUserError> {
        if !EMAIL_RE.is_match(email) {
            return Err(CreateUserError::InvalidEmail(email.to_string()));
        }

        let password = raw_password.to_string();
        let security = security.clone();
        let password_hash = task::spawn_blocking(move || hash_password(&password, &security))
            .await
            .map_err(|e| CreateUserError::Store(anyhow::anyhow!("Hashing task panicked: {e}")))?
            .map_err(CreateUserError::Store)?;

        let now = chrono::Utc::now().to_rfc3339();

        let active = users::ActiveModel {
            email: Set(email.to_string()),
            password_hash: Set(password_hash),
            role: Set(role.to_string()),
            api_key: Set(api_key),
            last_login: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        match active.insert(&self.conn).await {
            Ok(model) => Ok(User::from(model)),
            Err(err) => {
                // The unique constraint is the authority on duplicates, so a
                // racing second insert also lands here.
                if matches!(
                    err.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) {
                    Err(CreateUserError::DuplicateEmail(email.to_string()))
                } else {
                    Err(CreateUserError::Store(
                        anyhow::Error::from(err).context("Failed to insert user"),
                    ))
                }
            }
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    /// Look up the user holding an API key. At most one row can match.
    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::ApiKey.eq(api_key))
            .one(&self.conn)
            .await
            .context("Failed to query user by API key")?;

        Ok(user.map(User::from))
    }

    /// Verify a password for an email. Unknown users and malformed stored
    /// hashes both verify as false.
    /// Note: uses `spawn_blocking` because Argon2 verification is
    /// CPU-intensive and would block the async runtime if run directly.
    pub async fn verify_password(&self, email: &str, password: &str) -> Result<bool> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            return Ok(false);
        };

        let password_hash = user.password_hash;
        let password = password.to_string();

        let is_valid = task::spawn_blocking(move || verify_password(&password, &password_hash))
            .await
            .context("Password verification task panicked")?;

        Ok(is_valid)
    }

    /// The only password-update path. Hashing happens inside, so no caller
    /// can persist a plaintext password by mistake.
    pub async fn set_password(
        &self,
        user_id: i32,
        raw_password: &str,
        security: &SecurityConfig,
    ) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let password = raw_password.to_string();
        let security = security.clone();
        let new_hash = task::spawn_blocking(move || hash_password(&password, &security))
            .await
            .context("Password hashing task panicked")??;

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(new_hash);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn touch_last_login(&self, user_id: i32) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for login timestamp")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.last_login = Set(Some(now.clone()));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Replace the API key. The previous key stops resolving the moment the
    /// update commits. A theoretical collision with another user's key hits
    /// the unique constraint and surfaces as an error instead of silently
    /// overwriting anything.
    pub async fn regenerate_api_key(&self, user_id: i32) -> Result<String> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for API key regeneration")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let new_api_key = generate_api_key();

        let mut active: users::ActiveModel = user.into();
        active.api_key = Set(Some(new_api_key.clone()));
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(new_api_key)
    }

    pub async fn count_admins(&self) -> Result<u64> {
        let count = users::Entity::find()
            .filter(users::Column::Role.eq(ROLE_ADMIN))
            .count(&self.conn)
            .await
            .context("Failed to count admin users")?;

        Ok(count)
    }

    pub async fn first_admin(&self) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Role.eq(ROLE_ADMIN))
            .one(&self.conn)
            .await
            .context("Failed to query admin user")?;

        Ok(user.map(User::from))
    }
}

/// Hash a password using Argon2id with the configured work factor.
pub fn hash_password(password: &str, security: &SecurityConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let params = Params::new(
        security.argon2_memory_cost_kib,
        security.argon2_time_cost,
        security.argon2_parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash. Fails closed: a missing or
/// malformed stored hash is a mismatch, never an error.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(stored_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random API key (64 character hex string, 256 bits of entropy)
#[must_use]
pub fn generate_api_key() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    #[test]
    fn test_hash_is_salted() {
        let security = fast_params();
        let a = hash_password("hunter2", &security).unwrap();
        let b = hash_password("hunter2", &security).unwrap();

        assert_ne!(a, "hunter2");
        assert_ne!(a, b, "two hashes of the same password must differ");
        assert!(verify_password("hunter2", &a));
        assert!(verify_password("hunter2", &b));
    }

    #[test]
    fn test_verify_rejects_wrong_password() {
        let hash = hash_password("correct", &fast_params()).unwrap();
        assert!(!verify_password("incorrect", &hash));
    }

    #[test]
    fn test_verify_fails_closed_on_malformed_hash() {
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        let other = generate_api_key();
        assert_ne!(key, other);
    }

    #[test]
    fn test_email_regex() {
        assert!(EMAIL_RE.is_match("user@example.com"));
        assert!(EMAIL_RE.is_match("a.b+c@sub.domain.org"));
        assert!(!EMAIL_RE.is_match("not-an-email"));
        assert!(!EMAIL_RE.is_match("missing@tld"));
        assert!(!EMAIL_RE.is_match("spaces in@mail.com"));
    }
}
