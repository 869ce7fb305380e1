use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{CreateUserError, ROLE_ADMIN, Store, User, generate_api_key};

/// Guarantee exactly one administrator exists before the server accepts
/// traffic. Idempotent: with an admin already present this performs zero
/// writes. Two processes racing past the zero-admin check are serialized by
/// the unique email constraint; the loser falls back to reading the winner's
/// row.
pub async fn ensure_admin(store: &Store, config: &Config) -> Result<User> {
    let admin_count = store.count_admins().await?;

    if admin_count > 0 {
        info!("Admin user already exists, skipping creation");
        return store
            .first_admin()
            .await?
            .context("Admin count was non-zero but no admin row found");
    }

    info!("Admin user not found, creating default admin");

    match store
        .create_user(
            &config.auth.admin_email,
            &config.auth.admin_password,
            ROLE_ADMIN,
            Some(generate_api_key()),
            &config.security,
        )
        .await
    {
        Ok(user) => {
            info!("Admin user created: {}", user.email);
            Ok(user)
        }
        Err(CreateUserError::DuplicateEmail(_)) => {
            // Another process won the bootstrap race.
            warn!("Admin creation raced with another process, reusing existing row");
            store
                .first_admin()
                .await?
                .context("Admin insert collided but no admin row found")
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to create admin user")),
    }
}
