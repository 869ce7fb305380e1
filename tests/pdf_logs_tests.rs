use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use pdfdesk::config::Config;
use tower::ServiceExt;

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.geolocation.mock_mode = true;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config
}

async fn spawn_app() -> Router {
    spawn_app_with(test_config()).await
}

async fn spawn_app_with(config: Config) -> Router {
    let state = pdfdesk::api::create_app_state(config)
        .await
        .expect("Failed to create app state");
    pdfdesk::api::router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Registers a user and returns `(bearer_token, api_key)`.
async fn provision_user(app: &Router, email: &str) -> (String, String) {
    let register = Request::builder()
        .method("POST")
        .uri("/api/auth/register")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::json!({ "email": email, "password": "pw-123456" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let login = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::json!({ "email": email, "password": "pw-123456" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(login).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let me = Request::builder()
        .uri("/api/auth/me")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(me).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let api_key = body_json(response).await["apiKey"]
        .as_str()
        .unwrap()
        .to_string();

    (token, api_key)
}

fn log_request(api_key: &str, payload: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/pdfLogs/log")
        .header("X-API-Key", api_key)
        .header("Content-Type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_log_requires_api_key() {
    let app = spawn_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/pdfLogs/log")
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::json!({ "action": "merge" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["message"], "API key required");

    let response = app
        .clone()
        .oneshot(log_request("0000-not-a-key", serde_json::json!({ "action": "merge" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["message"], "Invalid API key");
}

#[tokio::test]
async fn test_log_prefixes_action_and_stores_metadata() {
    let app = spawn_app().await;
    let (token, api_key) = provision_user(&app, "service@example.com").await;

    let response = app
        .clone()
        .oneshot(log_request(
            &api_key,
            serde_json::json!({
                "action": "merge",
                "fileId": "f-99",
                "fileName": "combined.pdf",
                "operationType": "merge"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Operation logged successfully");
    assert!(body["historyId"].is_number());

    // The stored action carries the pdf- prefix.
    let request = Request::builder()
        .uri("/api/history/by-type/pdf-merge")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entries = body_json(response).await;
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "pdf-merge");
    assert_eq!(entries[0]["accessType"], "api");
    assert_eq!(entries[0]["metadata"]["fileId"], "f-99");
    assert_eq!(entries[0]["metadata"]["fileName"], "combined.pdf");
}

#[tokio::test]
async fn test_log_defaults_description() {
    let app = spawn_app().await;
    let (token, api_key) = provision_user(&app, "terse@example.com").await;

    let response = app
        .clone()
        .oneshot(log_request(&api_key, serde_json::json!({ "action": "split" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/history/by-type/pdf-split")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let entries = body_json(response).await;
    assert_eq!(entries[0]["description"], "PDF operation: split");
}

#[tokio::test]
async fn test_log_rejects_empty_action() {
    let app = spawn_app().await;
    let (_, api_key) = provision_user(&app, "noop@example.com").await;

    let response = app
        .clone()
        .oneshot(log_request(&api_key, serde_json::json!({ "action": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_accepts_either_credential() {
    let app = spawn_app().await;
    let (token, api_key) = provision_user(&app, "either@example.com").await;

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(log_request(
                &api_key,
                serde_json::json!({ "action": format!("rotate-{i}") }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // API key.
    let request = Request::builder()
        .uri("/api/pdfLogs?page=1&limit=2")
        .header("X-API-Key", &api_key)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["pages"], 2);

    // Bearer token hits the same route.
    let request = Request::builder()
        .uri("/api/pdfLogs")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    // No credential at all.
    let request = Request::builder()
        .uri("/api/pdfLogs")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["message"],
        "Authentication required"
    );
}

#[tokio::test]
async fn test_list_only_returns_pdf_entries() {
    let app = spawn_app().await;
    let (token, api_key) = provision_user(&app, "mixed@example.com").await;

    // A frontend history entry must not leak into the PDF log view.
    let request = Request::builder()
        .method("POST")
        .uri("/api/history/log")
        .header("Authorization", format!("Bearer {token}"))
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::json!({ "action": "download" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(log_request(&api_key, serde_json::json!({ "action": "compress" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/pdfLogs")
        .header("X-API-Key", &api_key)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "pdf-compress");
}

#[tokio::test]
async fn test_geolocation_outage_does_not_fail_logging() {
    let mut config = test_config();
    // Real lookups against an address nothing listens on.
    config.geolocation.mock_mode = false;
    config.geolocation.lookup_url = "http://127.0.0.1:9/json".to_string();
    let app = spawn_app_with(config).await;
    let (token, api_key) = provision_user(&app, "offline@example.com").await;

    let mut request = log_request(&api_key, serde_json::json!({ "action": "sign" }));
    request
        .headers_mut()
        .insert("X-Forwarded-For", "8.8.8.8".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/history/by-type/pdf-sign")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let entries = body_json(response).await;
    assert_eq!(entries[0]["ipAddress"], "8.8.8.8");
    // Location fell back to a canned city rather than failing the request.
    assert!(!entries[0]["city"].as_str().unwrap().is_empty());
}
