use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::entities::history;

pub mod migrator;
pub mod repositories;

pub use repositories::history::{ACCESS_API, ACCESS_FRONTEND, NewHistoryEntry};
pub use repositories::user::{CreateUserError, ROLE_ADMIN, ROLE_USER, User, generate_api_key};

/// Storage client constructed once at process start and handed to every
/// component that needs it. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    /// Bounded startup retry with a fixed delay between attempts. The server
    /// must not bind its listener until this has succeeded.
    pub async fn connect_with_retry(
        db_url: &str,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match Self::new(db_url).await {
                Ok(store) => return Ok(store),
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Database connection attempt {}/{} failed: {e}",
                        attempt, max_retries
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Giving up on database connection after {max_retries} attempts"
                    )));
                }
            }
        }
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn history_repo(&self) -> repositories::history::HistoryRepository {
        repositories::history::HistoryRepository::new(self.conn.clone())
    }

    pub async fn create_user(
        &self,
        email: &str,
        raw_password: &str,
        role: &str,
        api_key: Option<String>,
        security: &SecurityConfig,
    ) -> Result<User, CreateUserError> {
        self.user_repo()
            .create(email, raw_password, role, api_key, security)
            .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().find_by_email(email).await
    }

    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().find_by_id(id).await
    }

    pub async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        self.user_repo().find_by_api_key(api_key).await
    }

    pub async fn verify_user_password(&self, email: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(email, password).await
    }

    pub async fn set_user_password(
        &self,
        user_id: i32,
        raw_password: &str,
        security: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .set_password(user_id, raw_password, security)
            .await
    }

    pub async fn touch_last_login(&self, user_id: i32) -> Result<()> {
        self.user_repo().touch_last_login(user_id).await
    }

    pub async fn regenerate_api_key(&self, user_id: i32) -> Result<String> {
        self.user_repo().regenerate_api_key(user_id).await
    }

    pub async fn count_admins(&self) -> Result<u64> {
        self.user_repo().count_admins().await
    }

    pub async fn first_admin(&self) -> Result<Option<User>> {
        self.user_repo().first_admin().await
    }

    pub async fn record_history(&self, entry: NewHistoryEntry) -> Result<history::Model> {
        self.history_repo().record(entry).await
    }

    pub async fn recent_history(&self, user_id: i32, limit: u64) -> Result<Vec<history::Model>> {
        self.history_repo().recent(user_id, limit).await
    }

    pub async fn history_by_action(
        &self,
        user_id: i32,
        action: &str,
        limit: u64,
    ) -> Result<Vec<history::Model>> {
        self.history_repo().by_action(user_id, action, limit).await
    }

    pub async fn history_by_action_prefix(
        &self,
        user_id: i32,
        prefix: &str,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<history::Model>, u64)> {
        self.history_repo()
            .by_action_prefix(user_id, prefix, page, page_size)
            .await
    }

    pub async fn all_history(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<(history::Model, Option<String>)>, u64)> {
        self.history_repo().all(page, page_size).await
    }

    pub async fn clear_user_history(&self, user_id: i32) -> Result<u64> {
        self.history_repo().clear_user(user_id).await
    }

    pub async fn clear_all_history(&self) -> Result<u64> {
        self.history_repo().clear_all().await
    }

    pub async fn export_history_csv(&self) -> Result<String> {
        self.history_repo().export_csv().await
    }
}
