use sea_orm::entity::prelude::*;
use serde::Serialize;

/// Append-only activity ledger. Rows are never updated after insert; the only
/// deletion paths are a user clearing their own rows or an admin clearing all.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "history")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,

    /// Short machine-readable label; PDF-operation entries carry a "pdf-" prefix
    pub action: String,

    pub description: String,

    pub ip_address: Option<String>,

    pub user_agent: Option<String>,

    /// Never null: "Unknown" or a fallback location when resolution fails
    pub city: String,

    pub country: String,

    /// Which credential produced the entry: "frontend" or "api"
    pub access_type: String,

    /// Free-form structured payload, opaque to the ledger
    pub metadata: Option<Json>,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
