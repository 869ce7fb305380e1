use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::db::{ACCESS_API, ACCESS_FRONTEND, ROLE_ADMIN, User};
use crate::services::{Claims, RequestMeta};

/// Identity resolved by an authentication strategy, attached to the request
/// extensions for handlers to read.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Bearer-token path carries the verified claims, not a fresh row
    Claims(Claims),
    /// API-key path carries the full user record
    User(User),
}

impl Identity {
    #[must_use]
    pub const fn user_id(&self) -> i32 {
        match self {
            Self::Claims(claims) => claims.id,
            Self::User(user) => user.id,
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::Claims(claims) => &claims.email,
            Self::User(user) => &user.email,
        }
    }

    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Self::Claims(claims) => &claims.role,
            Self::User(user) => &user.role,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role() == ROLE_ADMIN
    }
}

/// 403 unless the resolved identity carries the admin role.
pub fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin access required"))
    }
}

// ============================================================================
// Authentication strategies
// ============================================================================

/// Try to resolve an identity from the `X-API-Key` header.
/// `Ok(None)` means the header is absent (next strategy may run); a present
/// but unknown key is a hard 401.
async fn try_api_key(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
    let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    let user = state
        .store
        .find_user_by_api_key(key)
        .await
        .map_err(|e| ApiError::internal(format!("API key lookup failed: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

    Ok(Some(user))
}

/// Try to resolve an identity from the `Authorization: Bearer` header.
/// `Ok(None)` means no bearer token was offered; verification failure or a
/// deleted user is a hard 401.
async fn try_bearer(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<(Claims, User)>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };

    let claims = state
        .tokens
        .verify(token)
        .map_err(|_| ApiError::unauthorized("Invalid token"))?;

    let user = state
        .store
        .find_user_by_id(claims.id)
        .await
        .map_err(|e| ApiError::internal(format!("User lookup failed: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Invalid token"))?;

    Ok(Some((claims, user)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

// ============================================================================
// Middleware
// ============================================================================

/// Session-bearer gate for browser-originated requests. On success the
/// token's claims ride along as the request identity and, unless this is an
/// identity-check route, an audit entry is written on a detached task with
/// `access_type = frontend`.
pub async fn bearer_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = req.headers().clone();

    if bearer_token(&headers).is_none() {
        return Err(ApiError::unauthorized("No token provided"));
    }

    let Some((claims, user)) = try_bearer(&state, &headers).await? else {
        return Err(ApiError::unauthorized("No token provided"));
    };

    tracing::Span::current().record("user_id", user.id);

    let path = req.uri().path().to_string();
    if !is_identity_check(&path) {
        let meta = request_meta(&req);
        let action = format!("{} {}", req.method(), path);
        state.audit.record_detached(
            user.id,
            action.clone(),
            format!("Authenticated access: {action}"),
            meta,
            ACCESS_FRONTEND,
            None,
        );
    }

    req.extensions_mut().insert(Identity::Claims(claims));
    Ok(next.run(req).await)
}

/// API-key gate for programmatic requests. The full user record becomes the
/// request identity and every request is audit-logged with
/// `access_type = api`.
pub async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = req.headers().clone();

    if !headers.contains_key("x-api-key") {
        return Err(ApiError::unauthorized("API key required"));
    }

    let Some(user) = try_api_key(&state, &headers).await? else {
        return Err(ApiError::unauthorized("API key required"));
    };

    tracing::Span::current().record("user_id", user.id);

    let meta = request_meta(&req);
    let action = format!("{} {}", req.method(), req.uri().path());
    state.audit.record_detached(
        user.id,
        action.clone(),
        format!("API access: {action}"),
        meta,
        ACCESS_API,
        None,
    );

    req.extensions_mut().insert(Identity::User(user));
    Ok(next.run(req).await)
}

/// Merged gate for routes accepting either credential: the API key strategy
/// runs first, then the bearer strategy; only when neither header is present
/// does the chain fall through to the generic 401.
pub async fn either_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = req.headers().clone();

    let identity = if let Some(user) = try_api_key(&state, &headers).await? {
        Identity::User(user)
    } else if let Some((claims, _)) = try_bearer(&state, &headers).await? {
        Identity::Claims(claims)
    } else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    tracing::Span::current().record("user_id", identity.user_id());

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Identity-check routes are exempt from audit logging; polling "who am I"
/// would otherwise flood the ledger.
fn is_identity_check(path: &str) -> bool {
    path.ends_with("/auth/me") || path.contains("/auth/verify")
}

// ============================================================================
// Client IP resolution
// ============================================================================

/// Resolve the originating client address behind typical reverse-proxy
/// deployments. Header precedence is fixed and load-bearing for audit-log
/// accuracy: X-Forwarded-For (first entry) wins over X-Real-IP, which wins
/// over the CDN headers, with the socket peer as the last resort.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    for header in [
        "x-real-ip",
        "cf-connecting-ip",
        "true-client-ip",
        "fastly-client-ip",
    ] {
        if let Some(value) = headers.get(header)
            && let Ok(ip) = value.to_str()
        {
            return Some(ip.trim().to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Extractor form of [`request_meta`] for handlers that record origin
/// information themselves.
#[derive(Debug, Clone)]
pub struct ClientMeta(pub RequestMeta);

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        Ok(Self(RequestMeta {
            ip: client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
        }))
    }
}

/// Capture request attributes for the audit write before the handler runs.
pub fn request_meta(req: &Request) -> RequestMeta {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);

    RequestMeta {
        ip: client_ip(req.headers(), peer),
        user_agent: req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.9.8.7:443".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_takes_first_entry_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        assert_eq!(
            client_ip(&headers, peer()),
            Some("203.0.113.5".to_string())
        );
    }

    #[test]
    fn test_real_ip_beats_cdn_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("192.0.2.44"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        assert_eq!(
            client_ip(&headers, peer()),
            Some("198.51.100.9".to_string())
        );
    }

    #[test]
    fn test_cdn_header_priority_order() {
        let mut headers = HeaderMap::new();
        headers.insert("true-client-ip", HeaderValue::from_static("192.0.2.2"));
        headers.insert("fastly-client-ip", HeaderValue::from_static("192.0.2.3"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("192.0.2.1"));

        assert_eq!(client_ip(&headers, peer()), Some("192.0.2.1".to_string()));
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer()), Some("10.9.8.7".to_string()));
        assert_eq!(client_ip(&headers, None), None);
    }

    #[test]
    fn test_identity_check_routes() {
        assert!(is_identity_check("/api/auth/me"));
        assert!(!is_identity_check("/api/history/recent"));
        assert!(!is_identity_check("/api/auth/generate-api-key"));
    }

    #[test]
    fn test_identity_accessors() {
        let identity = Identity::Claims(Claims {
            id: 3,
            email: "a@b.co".to_string(),
            role: "admin".to_string(),
            exp: 0,
        });

        assert_eq!(identity.user_id(), 3);
        assert!(identity.is_admin());
        assert!(require_admin(&identity).is_ok());

        let identity = Identity::Claims(Claims {
            id: 4,
            email: "c@d.co".to_string(),
            role: "user".to_string(),
            exp: 0,
        });
        assert!(require_admin(&identity).is_err());
    }
}
