#![forbid(unsafe_code)]

use crate::error::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

const IMDS_TOKEN_ENDPOINT: &str =
    "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01";
const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Tokens are refreshed this long before their reported expiry so a sweep
/// never presents a token that lapses mid-request.
const REFRESH_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn needs_refresh(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(REFRESH_SKEW_SECS) >= self.expires_at
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken>;
}

/// Managed-identity credential backed by the instance metadata service.
/// Tokens are cached and refreshed shortly before expiry.
pub struct ImdsCredential {
    http: reqwest::Client,
    token_url: String,
    cached: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct ImdsTokenResponse {
    access_token: String,
    expires_on: String,
}

impl ImdsCredential {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(IMDS_TOKEN_ENDPOINT)
    }

    /// Endpoint override for tests; production callers use [`ImdsCredential::new`].
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build IMDS HTTP client")?;
        Ok(Self {
            http,
            token_url: format!("{endpoint}&resource={MANAGEMENT_RESOURCE}"),
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let response = self
            .http
            .get(&self.token_url)
            .header("Metadata", "true")
            .send()
            .await
            .context("managed identity token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            crate::bail_err!(
                "managed identity token request returned {status}: {}",
                body.trim()
            );
        }

        let payload: ImdsTokenResponse = response
            .json()
            .await
            .context("managed identity token response was not valid JSON")?;

        let expires_on: i64 = payload
            .expires_on
            .parse()
            .map_err(|_| crate::err!("IMDS expires_on `{}` is not epoch seconds", payload.expires_on))?;
        let expires_at = Utc
            .timestamp_opt(expires_on, 0)
            .single()
            .ok_or_else(|| crate::err!("IMDS expires_on `{expires_on}` is out of range"))?;

        Ok(AccessToken {
            token: payload.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenCredential for ImdsCredential {
    async fn access_token(&self) -> Result<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.clone());
            }
        }

        let fresh = self.fetch().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Fixed-token credential for tests and pre-authenticated callers.
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn access_token(&self) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: Utc::now() + ChronoDuration::hours(24),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_refresh_honours_skew() {
        let expiring = AccessToken {
            token: "t".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(REFRESH_SKEW_SECS - 10),
        };
        assert!(expiring.needs_refresh());

        let fresh = AccessToken {
            token: "t".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(REFRESH_SKEW_SECS + 60),
        };
        assert!(!fresh.needs_refresh());
    }

    #[tokio::test]
    async fn static_credential_returns_fixed_token() {
        let credential = StaticCredential::new("secret");
        let token = credential.access_token().await.expect("token");
        assert_eq!(token.token, "secret");
        assert!(!token.needs_refresh());
    }
}
