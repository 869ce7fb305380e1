use axum::{
    Json, Router,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap;
use crate::clients::geoip::GeoClient;
use crate::config::Config;
use crate::db::Store;
use crate::services::{AuditLogger, TokenService};

pub mod auth;
mod error;
pub mod history;
pub mod middleware;
mod observability;
pub mod pdf_logs;

pub use error::ApiError;

/// Everything a handler needs, constructed once at startup and passed in
/// explicitly. No global connection handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub store: Store,

    pub geo: Arc<GeoClient>,

    pub tokens: Arc<TokenService>,

    pub audit: AuditLogger,
}

/// Build the application state: connect the store (bounded retry), run the
/// admin bootstrap, wire up the services. The HTTP listener must not bind
/// until this returns.
pub async fn create_app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = Store::connect_with_retry(
        &config.general.database_path,
        config.general.db_connect_retries,
        std::time::Duration::from_secs(config.general.db_connect_retry_delay_seconds),
    )
    .await?;

    bootstrap::ensure_admin(&store, &config).await?;

    let geo = Arc::new(GeoClient::new(config.geolocation.clone())?);
    let tokens = Arc::new(TokenService::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_hours,
    ));
    let audit = AuditLogger::new(store.clone(), Arc::clone(&geo));

    Ok(Arc::new(AppState {
        config,
        store,
        geo,
        tokens,
        audit,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.config.server.cors_allowed_origins.clone();

    let bearer_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route(
            "/auth/generate-api-key",
            post(auth::generate_api_key_handler),
        )
        .route("/history/recent", get(history::recent))
        .route("/history/by-type/{type}", get(history::by_type))
        .route("/history/log", post(history::log))
        .route("/history/clear", delete(history::clear))
        .route("/history/admin/all", get(history::admin_all))
        .route("/history/admin/export", get(history::admin_export))
        .route("/history/admin/clear", delete(history::admin_clear))
        .layer(from_fn_with_state(state.clone(), middleware::bearer_auth));

    let api_key_routes = Router::new()
        .route("/pdfLogs/log", post(pdf_logs::log))
        .layer(from_fn_with_state(state.clone(), middleware::api_key_auth));

    let either_routes = Router::new()
        .route("/pdfLogs", get(pdf_logs::list))
        .layer(from_fn_with_state(state.clone(), middleware::either_auth));

    let api_router = Router::new()
        .merge(bearer_routes)
        .merge(api_key_routes)
        .merge(either_routes)
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(observability::logging_middleware))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "message": "PDF Editor API is running" }))
}
