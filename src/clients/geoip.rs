use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::config::GeolocationConfig;

/// Resolved location. Never empty: callers always get a usable pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub country: String,
}

impl Location {
    fn unknown() -> Self {
        Self {
            city: "Unknown".to_string(),
            country: "Unknown".to_string(),
        }
    }
}

/// Static fallback table used for mock mode, private addresses, and any
/// lookup failure.
const FALLBACK_LOCATIONS: &[(&str, &str)] = &[
    ("Bratislava", "Slovakia"),
    ("Košice", "Slovakia"),
    ("Banská Bystrica", "Slovakia"),
    ("Žilina", "Slovakia"),
    ("Nitra", "Slovakia"),
    ("Trnava", "Slovakia"),
    ("Prešov", "Slovakia"),
    ("Prague", "Czech Republic"),
    ("Brno", "Czech Republic"),
    ("Vienna", "Austria"),
    ("Budapest", "Hungary"),
    ("Warsaw", "Poland"),
    ("Berlin", "Germany"),
];

#[derive(Debug, Deserialize)]
struct GeoLookupResponse {
    status: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

/// Best-effort IP-to-city/country client. `resolve` is infallible by
/// contract: audit logging must never be the reason a request fails.
#[derive(Clone)]
pub struct GeoClient {
    client: Client,
    config: GeolocationConfig,
}

impl GeoClient {
    pub fn new(config: GeolocationConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("pdfdesk/1.0")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build geolocation HTTP client: {e}"))?;

        Ok(Self { client, config })
    }

    /// Resolve an IP to a location. Mock mode, absent/unparseable addresses,
    /// and loopback/private/reserved ranges never hit the network.
    pub async fn resolve(&self, ip: Option<&str>) -> Location {
        let Some(ip) = ip else {
            return Self::fallback_location();
        };

        if self.config.mock_mode || !is_public_ip(ip) {
            debug!("Using fallback location for IP: {ip}");
            return Self::fallback_location();
        }

        match self.lookup(ip).await {
            Some(location) => location,
            None => {
                debug!("Geolocation lookup failed for {ip}, using fallback");
                Self::fallback_location()
            }
        }
    }

    async fn lookup(&self, ip: &str) -> Option<Location> {
        let url = format!("{}/{}", self.config.lookup_url.trim_end_matches('/'), ip);

        let response = self.client.get(&url).send().await.ok()?;
        let data: GeoLookupResponse = response.json().await.ok()?;

        if data.status.as_deref() == Some("fail") {
            return None;
        }

        Some(Location {
            city: data.city.unwrap_or_else(|| "Unknown".to_string()),
            country: data.country.unwrap_or_else(|| "Unknown".to_string()),
        })
    }

    fn fallback_location() -> Location {
        use rand::Rng;

        if FALLBACK_LOCATIONS.is_empty() {
            return Location::unknown();
        }

        let index = rand::rng().random_range(0..FALLBACK_LOCATIONS.len());
        let (city, country) = FALLBACK_LOCATIONS[index];
        Location {
            city: city.to_string(),
            country: country.to_string(),
        }
    }
}

/// An address qualifies for a real lookup only if it parses and is not
/// loopback, private, link-local, or otherwise unroutable.
fn is_public_ip(ip: &str) -> bool {
    let Ok(addr) = ip.parse::<IpAddr>() else {
        return false;
    };

    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            // fc00::/7 is the unique-local range
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local)
        }
    }
}
