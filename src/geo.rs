use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::fetch::{FetchError, HttpFetcher};

pub const UNKNOWN: &str = "Unknown";

/// Normalized geolocation result, independent of the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
}

impl GeoRecord {
    pub fn unknown(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            country: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            isp: UNKNOWN.to_string(),
        }
    }

    pub fn local(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            country: "Local Network".to_string(),
            region: "Local".to_string(),
            city: "Local".to_string(),
            isp: "Local Network".to_string(),
        }
    }
}

/// Loopback or private address, by literal/prefix match only.
///
/// Does not recognise `172.16.0.0/12` or IPv6 private ranges.
pub fn is_local_address(ip: &str) -> bool {
    matches!(ip, "127.0.0.1" | "::1" | "localhost")
        || ip.starts_with("192.168.")
        || ip.starts_with("10.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// ipapi.co
    IpApiCo,
    /// ip-api.com
    IpApiCom,
    /// ipinfo.io
    IpInfo,
}

/// Response keys a provider uses for each `GeoRecord` field.
struct FieldKeys {
    ip: &'static str,
    country: &'static str,
    region: &'static str,
    city: &'static str,
    isp: &'static str,
}

impl ProviderKind {
    fn keys(self) -> FieldKeys {
        match self {
            Self::IpApiCo => FieldKeys {
                ip: "ip",
                country: "country_name",
                region: "region",
                city: "city",
                isp: "org",
            },
            Self::IpApiCom => FieldKeys {
                ip: "query",
                country: "country",
                region: "regionName",
                city: "city",
                isp: "isp",
            },
            Self::IpInfo => FieldKeys {
                ip: "ip",
                country: "country",
                region: "region",
                city: "city",
                isp: "org",
            },
        }
    }
}

/// One geolocation provider: its response schema plus the origin it is reached at.
#[derive(Debug, Clone)]
pub struct Provider {
    kind: ProviderKind,
    origin: String,
}

impl Provider {
    pub fn new(kind: ProviderKind, origin: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self { kind, origin }
    }

    /// Providers in fallback order.
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self::new(ProviderKind::IpApiCo, "https://ipapi.co"),
            // The free tier of ip-api.com is plain HTTP only.
            Self::new(ProviderKind::IpApiCom, "http://ip-api.com"),
            Self::new(ProviderKind::IpInfo, "https://ipinfo.io"),
        ]
    }

    /// Endpoint describing whoever makes the request.
    pub fn base_url(&self) -> String {
        match self.kind {
            ProviderKind::IpApiCo | ProviderKind::IpApiCom => format!("{}/json/", self.origin),
            ProviderKind::IpInfo => format!("{}/json", self.origin),
        }
    }

    pub fn lookup_url(&self, ip: Option<&str>) -> String {
        let Some(ip) = ip else {
            return self.base_url();
        };
        let ip = urlencoding::encode(ip);
        match self.kind {
            ProviderKind::IpApiCo => format!("{}/{ip}/json/", self.origin),
            ProviderKind::IpApiCom => format!("{}/json/{ip}", self.origin),
            ProviderKind::IpInfo => format!("{}/{ip}/json", self.origin),
        }
    }

    /// A `200` body can still carry a provider-level refusal
    /// (reserved range, quota, malformed query).
    fn rejects(body: &JsonValue) -> bool {
        body.get("error").is_some() || body.get("status").and_then(JsonValue::as_str) == Some("fail")
    }

    /// Map a raw response body onto a `GeoRecord`. `fallback_ip` stands in
    /// when the provider does not echo the address.
    pub fn parse(&self, body: &JsonValue, fallback_ip: &str) -> GeoRecord {
        let keys = self.kind.keys();
        let field = |key: &str| {
            body.get(key)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        GeoRecord {
            ip: field(keys.ip).unwrap_or_else(|| fallback_ip.to_string()),
            country: field(keys.country).unwrap_or_else(|| UNKNOWN.to_string()),
            region: field(keys.region).unwrap_or_else(|| UNKNOWN.to_string()),
            city: field(keys.city).unwrap_or_else(|| UNKNOWN.to_string()),
            isp: field(keys.isp).unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ProviderFailure {
    #[error("{0}")]
    Transport(#[from] FetchError),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Malformed body: {0}")]
    Malformed(String),

    #[error("Provider reported an error")]
    Rejected,
}

/// Outcome of probing one provider's base endpoint.
#[derive(Debug, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub status_code: Option<u16>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sequential first-success lookup over an ordered provider list.
pub struct GeoResolver {
    providers: Vec<Provider>,
    fetcher: Arc<dyn HttpFetcher>,
}

impl GeoResolver {
    pub fn new(providers: Vec<Provider>, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { providers, fetcher }
    }

    /// Look up `ip`, or the requester's own address when `None`.
    ///
    /// Returns `None` only when every provider failed.
    pub async fn lookup(&self, ip: Option<&str>) -> Option<GeoRecord> {
        if let Some(ip) = ip.filter(|ip| is_local_address(ip)) {
            tracing::debug!("Skipping geolocation for local address {ip}");
            return Some(GeoRecord::local(ip));
        }

        let fallback_ip = ip.unwrap_or(UNKNOWN);
        for provider in &self.providers {
            let url = provider.lookup_url(ip);
            match self.query(provider, &url, fallback_ip).await {
                Ok(record) => {
                    tracing::info!("Fetched geolocation for {} from {url}", record.ip);
                    return Some(record);
                }
                Err(e) => tracing::warn!("Geolocation provider {url} failed: {e}"),
            }
        }

        tracing::warn!("All geolocation providers failed for {fallback_ip}");
        None
    }

    /// Like `lookup`, but degrades to an all-`Unknown` record instead of failing.
    pub async fn resolve(&self, ip: Option<&str>) -> GeoRecord {
        match self.lookup(ip).await {
            Some(record) => record,
            None => GeoRecord::unknown(ip.unwrap_or(UNKNOWN)),
        }
    }

    async fn query(
        &self,
        provider: &Provider,
        url: &str,
        fallback_ip: &str,
    ) -> Result<GeoRecord, ProviderFailure> {
        let reply = self.fetcher.get(url).await?;
        if reply.status != 200 {
            return Err(ProviderFailure::Status(reply.status));
        }

        let body: JsonValue = serde_json::from_str(&reply.body)
            .map_err(|e| ProviderFailure::Malformed(e.to_string()))?;
        if !body.is_object() {
            return Err(ProviderFailure::Malformed("expected a JSON object".to_string()));
        }
        if Provider::rejects(&body) {
            return Err(ProviderFailure::Rejected);
        }

        Ok(provider.parse(&body, fallback_ip))
    }

    /// Hit every provider's base endpoint and report what came back.
    pub async fn probe(&self) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let url = provider.base_url();
            let result = match self.fetcher.get(&url).await {
                Ok(reply) if reply.status == 200 => {
                    match serde_json::from_str::<JsonValue>(&reply.body) {
                        Ok(data) => ProbeResult {
                            url,
                            status_code: Some(reply.status),
                            success: true,
                            data: Some(data),
                            error: None,
                        },
                        Err(e) => ProbeResult {
                            url,
                            status_code: Some(reply.status),
                            success: false,
                            data: None,
                            error: Some(e.to_string()),
                        },
                    }
                }
                Ok(reply) => ProbeResult {
                    url,
                    status_code: Some(reply.status),
                    success: false,
                    data: None,
                    error: None,
                },
                Err(e) => ProbeResult {
                    url,
                    status_code: None,
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        results
    }
}
