#![forbid(unsafe_code)]

use crate::error::{Context, Result};
use crate::rest::auth::TokenCredential;
use crate::telemetry::runtime_counters;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Url};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MANAGEMENT_BASE: &str = "https://management.azure.com";

/// One management-plane exchange. The body is decoded eagerly: `Null` for an
/// empty body, parsed JSON where possible, and the raw text otherwise.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: JsonValue,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Compact rendering of the body for per-target failure messages.
    pub fn body_text(&self) -> String {
        match &self.body {
            JsonValue::Null => String::new(),
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Issues authenticated requests against the management plane. Paths are
/// management-relative (`/subscriptions/...`); the caller owns retry and
/// status classification.
#[async_trait]
pub trait ManagementCaller: Send + Sync {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<RestResponse>;

    /// The management origin requests are issued against.
    fn endpoint(&self) -> &str;

    /// Reduces an absolute management URL (a `nextLink`, an
    /// `Azure-AsyncOperation` value) to the relative form [`send`] expects.
    fn relative_path(&self, url: &str) -> String {
        strip_origin(url, self.endpoint())
            .or_else(|| strip_origin(url, MANAGEMENT_BASE))
            .unwrap_or_else(|| url.to_string())
    }
}

fn strip_origin(url: &str, origin: &str) -> Option<String> {
    let origin = origin.trim_end_matches('/');
    let head = url.get(..origin.len())?;
    if head.eq_ignore_ascii_case(origin) {
        let rest = &url[origin.len()..];
        if rest.is_empty() {
            return Some("/".to_string());
        }
        if rest.starts_with('/') {
            return Some(rest.to_string());
        }
    }
    None
}

pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
}

impl ArmClient {
    pub fn new(
        endpoint: &str,
        credential: Arc<dyn TokenCredential>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Url::parse(&endpoint)
            .with_context(|| format!("invalid management endpoint `{endpoint}`"))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build management HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            credential,
        })
    }
}

#[async_trait]
impl ManagementCaller for ArmClient {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<RestResponse> {
        crate::ensure_err!(
            path.starts_with('/'),
            "management path `{path}` must be relative (begin with `/`)"
        );

        let url = Url::parse(&format!("{}{}", self.endpoint, path))
            .with_context(|| format!("failed to build management URL for `{path}`"))?;
        let token = self.credential.access_token().await?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {}", token.token));
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let operation = operation_label(path);
        let started = Instant::now();
        let response = request.send().await.map_err(|err| {
            runtime_counters().record_rest_request(operation, 0, started.elapsed());
            crate::err!("management request {method} {path} failed: {err}")
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let bytes = response.bytes().await.map_err(|err| {
            runtime_counters().record_rest_request(operation, status, started.elapsed());
            crate::err!("failed to read management response for {method} {path}: {err}")
        })?;
        runtime_counters().record_rest_request(operation, status, started.elapsed());

        Ok(RestResponse {
            status,
            headers,
            body: decode_body(&bytes),
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn decode_body(bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(json) = serde_json::from_slice::<JsonValue>(bytes) {
        return json;
    }
    JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Coarse per-operation label for request metrics, derived from the last
/// path segment before the query string.
fn operation_label(path: &str) -> &'static str {
    let path = path.split('?').next().unwrap_or(path);
    let last = path.rsplit('/').find(|segment| !segment.is_empty());
    match last {
        Some("subscriptions") => "list_subscriptions",
        Some("resourcegroups") => "list_resource_groups",
        Some("servers") => "list_servers",
        Some("elasticpools") => "list_elastic_pools",
        Some("databases") => "list_databases",
        Some("failover") => "failover",
        Some("resources") => "resource_graph",
        _ => {
            if path.contains("/operationResults/") || path.contains("/operations/") {
                "operation_status"
            } else {
                "other"
            }
        }
    }
}
