use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::middleware::{ClientMeta, Identity};
use super::{ApiError, AppState};
use crate::db::{ACCESS_FRONTEND, ROLE_USER, generate_api_key};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserDto,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserDto,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: i32,
    pub email: String,
    pub role: String,
    pub api_key: Option<String>,
    pub last_login: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// POST /api/auth/register
/// Self-registration always lands as a plain user; the role cannot be chosen.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if payload.email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let user = state
        .store
        .create_user(
            &payload.email,
            &payload.password,
            ROLE_USER,
            Some(generate_api_key()),
            &state.config.security,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user: UserDto {
                id: user.id,
                email: user.email,
                role: user.role,
            },
        }),
    ))
}

/// POST /api/auth/login
/// The same 401 covers unknown emails and wrong passwords.
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientMeta(meta): ClientMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let is_valid = state
        .store
        .verify_user_password(&payload.email, &payload.password)
        .await
        .map_err(|e| ApiError::internal(format!("Authentication error: {e}")))?;

    if !is_valid {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let user = state
        .store
        .find_user_by_email(&payload.email)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to get user: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let token = state
        .tokens
        .issue(&user)
        .map_err(|e| ApiError::internal(format!("Failed to sign token: {e}")))?;

    state
        .store
        .touch_last_login(user.id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to update last login: {e}")))?;

    state.audit.record_detached(
        user.id,
        "login".to_string(),
        "User logged in".to_string(),
        meta,
        ACCESS_FRONTEND,
        None,
    );

    tracing::info!("User logged in: {}", user.email);

    Ok(Json(LoginResponse {
        token,
        user: UserDto {
            id: user.id,
            email: user.email,
            role: user.role,
        },
    }))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .store
        .find_user_by_id(identity.user_id())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to get user: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Invalid token"))?;

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        role: user.role,
        api_key: user.api_key,
        last_login: user.last_login,
    }))
}

/// POST /api/auth/generate-api-key
/// The previous key stops working the moment the new one is stored.
pub async fn generate_api_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let api_key = state
        .store
        .regenerate_api_key(identity.user_id())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to generate API key: {e}")))?;

    tracing::info!("API key regenerated for user {}", identity.user_id());

    Ok(Json(ApiKeyResponse { api_key }))
}
