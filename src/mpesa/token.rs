//! Daraja OAuth token cache.
//!
//! Tokens come from `GET /oauth/v1/generate?grant_type=client_credentials`
//! with HTTP Basic auth. They are cached in-process and refreshed inside a
//! single critical section, so concurrent callers never stampede the
//! token endpoint.

use crate::config::MpesaConfig;
use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::mpesa::types::TokenResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tokens are treated as expired this many seconds before the gateway's
/// stated lifetime, so a token is never used at the edge of its validity.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Caching OAuth token source for the Daraja API.
pub struct TokenManager {
    config: MpesaConfig,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(config: MpesaConfig) -> MpesaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MpesaError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            config,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Returns a bearer token, refreshing it from the gateway if the
    /// cached one is missing or inside the safety margin.
    ///
    /// The cache mutex is held across the refresh request, so only one
    /// caller talks to the token endpoint at a time; the rest wait and
    /// reuse the result.
    pub async fn bearer_token(&self) -> MpesaResult<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
            debug!("Cached gateway token expired, refreshing");
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    /// Drops the cached token so the next call fetches a fresh one. Used
    /// after the gateway rejects a request with 401.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        *cached = None;
    }

    async fn fetch_token(&self) -> MpesaResult<CachedToken> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let credentials = BASE64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Basic {}", credentials))
            .send()
            .await
            .map_err(|e| MpesaError::Auth {
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Gateway token request rejected");
            return Err(MpesaError::Auth {
                message: format!("token endpoint returned HTTP {}", status.as_u16()),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| MpesaError::Auth {
            message: format!("malformed token response: {}", e),
        })?;

        let access_token = body.access_token.ok_or_else(|| MpesaError::Auth {
            message: "token response missing access_token".to_string(),
        })?;
        let expires_in = body.expires_in.unwrap_or(3600);

        Ok(CachedToken {
            access_token,
            expires_at: expiry_from_lifetime(Utc::now(), expires_in),
        })
    }

    /// Test hook: seed the cache with a known token and expiry.
    #[cfg(test)]
    async fn seed(&self, access_token: &str, expires_at: DateTime<Utc>) {
        let mut cached = self.cached.lock().await;
        *cached = Some(CachedToken {
            access_token: access_token.to_string(),
            expires_at,
        });
    }
}

fn expiry_from_lifetime(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + Duration::seconds((expires_in - TOKEN_SAFETY_MARGIN_SECS).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: &str) -> MpesaConfig {
        MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            business_shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.com/callback".to_string(),
            base_url: base_url.to_string(),
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn fresh_cached_token_is_reused_without_network() {
        // Unroutable base URL: any network attempt would fail.
        let manager = TokenManager::new(test_config("http://127.0.0.1:1")).unwrap();
        manager
            .seed("cached-token", Utc::now() + Duration::seconds(600))
            .await;

        let token = manager.bearer_token().await.unwrap();
        assert_eq!(token, "cached-token");
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh_and_surfaces_auth_error() {
        let manager = TokenManager::new(test_config("http://127.0.0.1:1")).unwrap();
        manager
            .seed("stale-token", Utc::now() - Duration::seconds(1))
            .await;

        let err = manager.bearer_token().await.unwrap_err();
        assert!(matches!(err, MpesaError::Auth { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn invalidate_clears_cached_token() {
        let manager = TokenManager::new(test_config("http://127.0.0.1:1")).unwrap();
        manager
            .seed("cached-token", Utc::now() + Duration::seconds(600))
            .await;
        manager.invalidate().await;

        assert!(manager.bearer_token().await.is_err());
    }

    #[test]
    fn expiry_applies_safety_margin() {
        let now = Utc::now();
        assert_eq!(
            expiry_from_lifetime(now, 3600),
            now + Duration::seconds(3300)
        );
        // A lifetime shorter than the margin expires immediately.
        assert_eq!(expiry_from_lifetime(now, 200), now);
    }
}
