use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::fmt::Write;

use crate::entities::{history, prelude::*};

pub const ACCESS_FRONTEND: &str = "frontend";
pub const ACCESS_API: &str = "api";

/// Input for a ledger write. City/country are optional here but the stored
/// row always carries a value ("Unknown" when nothing was resolved).
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub user_id: i32,
    pub action: String,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub access_type: String,
    pub metadata: Option<serde_json::Value>,
}

pub struct HistoryRepository {
    conn: DatabaseConnection,
}

impl HistoryRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Append an entry. The ledger has no update path; `created_at` is set
    /// here and is the sole ordering key for every read query.
    pub async fn record(&self, entry: NewHistoryEntry) -> Result<history::Model> {
        let description = entry
            .description
            .unwrap_or_else(|| format!("{} operation", entry.action));

        let active = history::ActiveModel {
            user_id: Set(entry.user_id),
            action: Set(entry.action),
            description: Set(description),
            ip_address: Set(entry.ip_address),
            user_agent: Set(entry.user_agent),
            city: Set(entry.city.unwrap_or_else(|| "Unknown".to_string())),
            country: Set(entry.country.unwrap_or_else(|| "Unknown".to_string())),
            access_type: Set(entry.access_type),
            metadata: Set(entry.metadata),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert history entry")?;

        Ok(model)
    }

    pub async fn recent(&self, user_id: i32, limit: u64) -> Result<Vec<history::Model>> {
        let entries = History::find()
            .filter(history::Column::UserId.eq(user_id))
            .order_by_desc(history::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Failed to query recent history")?;

        Ok(entries)
    }

    pub async fn by_action(
        &self,
        user_id: i32,
        action: &str,
        limit: u64,
    ) -> Result<Vec<history::Model>> {
        let entries = History::find()
            .filter(history::Column::UserId.eq(user_id))
            .filter(history::Column::Action.eq(action))
            .order_by_desc(history::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Failed to query history by action")?;

        Ok(entries)
    }

    /// Paginated prefix query, newest first. Used for the `pdf-` listing.
    pub async fn by_action_prefix(
        &self,
        user_id: i32,
        prefix: &str,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<history::Model>, u64)> {
        let paginator = History::find()
            .filter(history::Column::UserId.eq(user_id))
            .filter(history::Column::Action.starts_with(prefix))
            .order_by_desc(history::Column::CreatedAt)
            .paginate(&self.conn, page_size);

        let total = paginator
            .num_items()
            .await
            .context("Failed to count history entries")?;
        let items = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .context("Failed to fetch history page")?;

        Ok((items, total))
    }

    /// Full ledger, paginated, newest first, joined with the acting user's
    /// email. Admin scope.
    pub async fn all(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<(history::Model, Option<String>)>, u64)> {
        let paginator = History::find()
            .find_also_related(Users)
            .order_by_desc(history::Column::CreatedAt)
            .paginate(&self.conn, page_size);

        let total = paginator
            .num_items()
            .await
            .context("Failed to count history entries")?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .context("Failed to fetch history page")?;

        let rows = rows
            .into_iter()
            .map(|(entry, user)| (entry, user.map(|u| u.email)))
            .collect();

        Ok((rows, total))
    }

    /// Delete the given user's rows only. Returns the number deleted.
    pub async fn clear_user(&self, user_id: i32) -> Result<u64> {
        let result = History::delete_many()
            .filter(history::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to clear user history")?;

        Ok(result.rows_affected)
    }

    /// Delete every row. Admin scope.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = History::delete_many()
            .exec(&self.conn)
            .await
            .context("Failed to clear history")?;

        Ok(result.rows_affected)
    }

    /// Serialize the full ledger, joined email included, newest first.
    pub async fn export_csv(&self) -> Result<String> {
        let rows = History::find()
            .find_also_related(Users)
            .order_by_desc(history::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to query history for export")?;

        let mut csv = String::from(
            "id,created_at,email,action,description,ip_address,user_agent,city,country,access_type\n",
        );

        for (entry, user) in rows {
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{},{},{},{},{}",
                entry.id,
                csv_escape(&entry.created_at),
                csv_escape(user.as_ref().map_or("", |u| &u.email)),
                csv_escape(&entry.action),
                csv_escape(&entry.description),
                csv_escape(entry.ip_address.as_deref().unwrap_or("")),
                csv_escape(entry.user_agent.as_deref().unwrap_or("")),
                csv_escape(&entry.city),
                csv_escape(&entry.country),
                csv_escape(&entry.access_type),
            );
        }

        Ok(csv)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
