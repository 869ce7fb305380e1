use std::sync::Arc;
use tracing::warn;

use crate::clients::geoip::GeoClient;
use crate::db::{NewHistoryEntry, Store};

/// Request attributes captured synchronously, before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Fire-and-forget writer for the activity ledger.
///
/// Each write runs on a detached task: geolocation is resolved there,
/// failures are logged and dropped, and nothing ever propagates back into
/// the request that triggered the write. Delivery is at-most-once by
/// design; an entry can be lost if storage or geolocation is down.
#[derive(Clone)]
pub struct AuditLogger {
    store: Store,
    geo: Arc<GeoClient>,
}

impl AuditLogger {
    #[must_use]
    pub const fn new(store: Store, geo: Arc<GeoClient>) -> Self {
        Self { store, geo }
    }

    pub fn record_detached(
        &self,
        user_id: i32,
        action: String,
        description: String,
        meta: RequestMeta,
        access_type: &'static str,
        metadata: Option<serde_json::Value>,
    ) {
        let store = self.store.clone();
        let geo = Arc::clone(&self.geo);

        tokio::spawn(async move {
            let location = geo.resolve(meta.ip.as_deref()).await;

            let entry = NewHistoryEntry {
                user_id,
                action: action.clone(),
                description: Some(description),
                ip_address: meta.ip,
                user_agent: meta.user_agent,
                city: Some(location.city),
                country: Some(location.country),
                access_type: access_type.to_string(),
                metadata,
            };

            if let Err(e) = store.record_history(entry).await {
                warn!("Failed to record audit entry for action '{action}': {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeolocationConfig, SecurityConfig};
    use crate::db::{ACCESS_FRONTEND, ROLE_USER};
    use std::time::Duration;

    #[tokio::test]
    async fn test_detached_write_lands() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let security = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        };
        let user = store
            .create_user("audit@example.com", "pw123456", ROLE_USER, None, &security)
            .await
            .unwrap();

        let geo = Arc::new(
            GeoClient::new(GeolocationConfig {
                mock_mode: true,
                ..GeolocationConfig::default()
            })
            .unwrap(),
        );
        let logger = AuditLogger::new(store.clone(), geo);

        logger.record_detached(
            user.id,
            "login".to_string(),
            "User logged in".to_string(),
            RequestMeta {
                ip: Some("127.0.0.1".to_string()),
                user_agent: Some("test-agent".to_string()),
            },
            ACCESS_FRONTEND,
            None,
        );

        // The write races past the caller; poll for it.
        for _ in 0..50 {
            let rows = store.recent_history(user.id, 10).await.unwrap();
            if !rows.is_empty() {
                assert_eq!(rows[0].action, "login");
                assert_ne!(rows[0].city, "");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        panic!("audit entry never landed");
    }
}
