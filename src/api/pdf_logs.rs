use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde_json::json;
use std::sync::Arc;

use super::history::{LogRequest, LogResponse, PagedResponse, Pagination};
use super::middleware::{ClientMeta, Identity};
use super::{ApiError, AppState};
use crate::db::{ACCESS_API, NewHistoryEntry};
use crate::entities::history;

const PDF_ACTION_PREFIX: &str = "pdf-";
const DEFAULT_PAGE_SIZE: u64 = 10;

/// POST /api/pdfLogs/log
/// Entry point for the external PDF service: the stored action is normalized
/// with the `pdf-` prefix and the file identifiers ride along as metadata.
/// The ledger write is the operation itself here, so it is awaited and a
/// failure is a 500.
pub async fn log(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ClientMeta(meta): ClientMeta,
    Json(payload): Json<LogRequest>,
) -> Result<Json<LogResponse>, ApiError> {
    if payload.action.is_empty() {
        return Err(ApiError::validation("Action is required"));
    }

    let location = state.geo.resolve(meta.ip.as_deref()).await;

    let entry = state
        .store
        .record_history(NewHistoryEntry {
            user_id: identity.user_id(),
            action: format!("{PDF_ACTION_PREFIX}{}", payload.action),
            description: Some(
                payload
                    .description
                    .unwrap_or_else(|| format!("PDF operation: {}", payload.action)),
            ),
            ip_address: meta.ip,
            user_agent: meta.user_agent,
            city: Some(location.city),
            country: Some(location.country),
            access_type: ACCESS_API.to_string(),
            metadata: Some(json!({
                "fileId": payload.file_id,
                "fileName": payload.file_name,
                "operationType": payload.operation_type,
            })),
        })
        .await
        .map_err(|e| ApiError::internal(format!("Failed to log operation: {e}")))?;

    Ok(Json(LogResponse {
        message: "Operation logged successfully".to_string(),
        history_id: entry.id,
    }))
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// GET /api/pdfLogs
/// Reachable with either credential (the merged auth chain); returns the
/// caller's `pdf-`-prefixed entries, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PagedResponse<history::Model>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

    let (entries, total) = state
        .store
        .history_by_action_prefix(identity.user_id(), PDF_ACTION_PREFIX, page, limit)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to fetch history: {e}")))?;

    Ok(Json(PagedResponse {
        data: entries,
        pagination: Pagination {
            total,
            page,
            pages: total.div_ceil(limit),
        },
    }))
}
