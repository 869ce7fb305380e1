use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::middleware::{ClientMeta, Identity, require_admin};
use super::{ApiError, AppState};
use crate::db::{ACCESS_FRONTEND, NewHistoryEntry};
use crate::entities::history;

const DEFAULT_LIMIT: u64 = 10;

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Deserialize)]
pub struct LogRequest {
    pub action: String,
    pub description: Option<String>,
    #[serde(rename = "fileId")]
    pub file_id: Option<String>,
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    #[serde(rename = "operationType")]
    pub operation_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub message: String,
    pub history_id: i32,
}

#[derive(Serialize)]
pub struct AdminHistoryDto {
    #[serde(flatten)]
    pub entry: history::Model,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

#[derive(Serialize)]
pub struct PagedResponse<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// GET /api/history/recent
/// Failures degrade to an empty array with 200 so the client's activity
/// widget never breaks on a transient storage problem.
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<history::Model>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    match state.store.recent_history(identity.user_id(), limit).await {
        Ok(entries) => Json(entries),
        Err(e) => {
            tracing::error!("Failed to fetch history: {e}");
            Json(Vec::new())
        }
    }
}

/// GET /api/history/by-type/{type}
pub async fn by_type(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(action): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<history::Model>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    match state
        .store
        .history_by_action(identity.user_id(), &action, limit)
        .await
    {
        Ok(entries) => Json(entries),
        Err(e) => {
            tracing::error!("Failed to fetch {action} history: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /api/history/log
/// Manual activity logging from the frontend. This is the primary operation
/// of the request, so a storage failure surfaces as 500 (unlike the detached
/// middleware writes). No geolocation lookup on this path.
pub async fn log(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ClientMeta(meta): ClientMeta,
    Json(payload): Json<LogRequest>,
) -> Result<Json<LogResponse>, ApiError> {
    if payload.action.is_empty() {
        return Err(ApiError::validation("Action is required"));
    }

    let metadata = if payload.file_id.is_some()
        || payload.file_name.is_some()
        || payload.operation_type.is_some()
    {
        Some(json!({
            "fileId": payload.file_id,
            "fileName": payload.file_name,
            "operationType": payload.operation_type.as_deref().unwrap_or(&payload.action),
        }))
    } else {
        None
    };

    let entry = state
        .store
        .record_history(NewHistoryEntry {
            user_id: identity.user_id(),
            action: payload.action,
            description: payload.description,
            ip_address: meta.ip,
            user_agent: meta.user_agent,
            city: None,
            country: None,
            access_type: ACCESS_FRONTEND.to_string(),
            metadata,
        })
        .await
        .map_err(|e| ApiError::internal(format!("Failed to log activity: {e}")))?;

    Ok(Json(LogResponse {
        message: "Activity logged successfully".to_string(),
        history_id: entry.id,
    }))
}

/// DELETE /api/history/clear
/// Deletes the caller's rows only.
pub async fn clear(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .clear_user_history(identity.user_id())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to clear history: {e}")))?;

    Ok(Json(json!({ "message": "History cleared successfully" })))
}

/// GET /api/history/admin/all
/// The full ledger, joined with each acting user's email.
pub async fn admin_all(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedResponse<AdminHistoryDto>>, ApiError> {
    require_admin(&identity)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);

    let (rows, total) = state
        .store
        .all_history(page, limit)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to fetch history: {e}")))?;

    let data = rows
        .into_iter()
        .map(|(entry, email)| AdminHistoryDto { entry, email })
        .collect();

    Ok(Json(PagedResponse {
        data,
        pagination: Pagination {
            total,
            page,
            pages: total.div_ceil(limit),
        },
    }))
}

/// GET /api/history/admin/export
/// CSV attachment of the full ledger.
pub async fn admin_export(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&identity)?;

    let csv = state
        .store
        .export_history_csv()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to export history: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"history-export.csv\"",
            ),
        ],
        csv,
    ))
}

/// DELETE /api/history/admin/clear
/// Deletes every row.
pub async fn admin_clear(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&identity)?;

    let deleted = state
        .store
        .clear_all_history()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to clear history: {e}")))?;

    tracing::info!("Admin cleared the full history ledger ({deleted} rows)");

    Ok(Json(json!({ "message": "History cleared successfully" })))
}
