//! OIDC discovery and token endpoint calls.

use std::time::{Duration, Instant};

use {
    secrecy::{ExposeSecret, SecretString},
    serde::Deserialize,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    Error, Result,
    backoff::{RetryPolicy, retry_with_backoff},
    pkce::PkceChallenge,
    types::TokenResponse,
};

/// Identity provider metadata from `.well-known/openid-configuration`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl DiscoveryConfig {
    /// Providers that do not advertise methods are assumed to accept S256.
    #[must_use]
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == PkceChallenge::METHOD)
    }
}

struct CachedDiscovery {
    config: DiscoveryConfig,
    fetched_at: Instant,
}

/// Resolves and caches provider metadata, and talks to its token endpoint.
pub struct DiscoveryClient {
    issuer: String,
    client_id: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    ttl: Option<Duration>,
    cache: RwLock<Option<CachedDiscovery>>,
}

impl DiscoveryClient {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        retry: RetryPolicy,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            http: reqwest::Client::new(),
            retry,
            ttl,
            cache: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        )
    }

    /// Cached metadata, fetching it (with retry and backoff) when the cache is
    /// empty or older than the TTL.
    pub async fn config(&self) -> Result<DiscoveryConfig> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            let stale = self
                .ttl
                .is_some_and(|ttl| cached.fetched_at.elapsed() >= ttl);
            if !stale {
                return Ok(cached.config.clone());
            }
            debug!(issuer = %self.issuer, "discovery cache expired");
        }

        let config = self.fetch().await?;
        *self.cache.write().await = Some(CachedDiscovery {
            config: config.clone(),
            fetched_at: Instant::now(),
        });
        Ok(config)
    }

    /// Drop cached metadata so the next call re-resolves it.
    pub async fn invalidate(&self) {
        if self.cache.write().await.take().is_some() {
            debug!(issuer = %self.issuer, "discovery cache invalidated");
        }
    }

    async fn fetch(&self) -> Result<DiscoveryConfig> {
        let url = self.discovery_url();
        let result = retry_with_backoff(self.retry, |attempt| {
            let url = url.clone();
            if attempt > 0 {
                record_retry();
            }
            async move {
                debug!(%url, attempt, "fetching discovery document");
                let resp = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                if !resp.status().is_success() {
                    return Err(format!("HTTP {}", resp.status()));
                }
                resp.json::<DiscoveryConfig>()
                    .await
                    .map_err(|e| format!("invalid discovery document: {e}"))
            }
        })
        .await;

        match result {
            Ok(config) => {
                if config.issuer.trim_end_matches('/') != self.issuer.trim_end_matches('/') {
                    warn!(
                        expected = %self.issuer,
                        actual = %config.issuer,
                        "discovery issuer does not match configured issuer"
                    );
                }
                info!(issuer = %self.issuer, "resolved identity provider metadata");
                Ok(config)
            },
            Err(reason) => Err(Error::Discovery {
                issuer: self.issuer.clone(),
                reason,
            }),
        }
    }

    /// Build the provider authorization URL for a redirect to `redirect_uri`.
    pub fn authorization_url(
        &self,
        config: &DiscoveryConfig,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
        pkce: Option<&PkceChallenge>,
    ) -> Result<String> {
        let mut url = Url::parse(&config.authorization_endpoint).map_err(|e| {
            Error::Config(format!(
                "invalid authorization endpoint {}: {e}",
                config.authorization_endpoint
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", state);
            if let Some(pkce) = pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", PkceChallenge::METHOD);
            }
        }
        Ok(url.into())
    }

    /// `authorization_code` grant. Failures map to [`Error::CallbackExchange`].
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<TokenResponse> {
        let config = self.config().await?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(verifier) = verifier {
            form.push(("code_verifier", verifier));
        }
        self.token_request(&config.token_endpoint, &form)
            .await
            .map_err(Error::CallbackExchange)
    }

    /// `refresh_token` grant. Failures map to [`Error::Refresh`].
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse> {
        let config = self.config().await?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        self.token_request(&config.token_endpoint, &form)
            .await
            .map_err(Error::Refresh)
    }

    async fn token_request(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, String> {
        let resp = self
            .http
            .post(endpoint)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(describe_token_error(status.as_u16(), &body));
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}

fn record_retry() {
    #[cfg(feature = "metrics")]
    skylark_metrics::counter!(skylark_metrics::oauth::DISCOVERY_RETRIES_TOTAL).increment(1);
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Turn an RFC 6749 error body into a short message.
fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorBody>(body) {
        Ok(TokenErrorBody {
            error,
            error_description: Some(desc),
        }) => format!("{error}: {desc} (HTTP {status})"),
        Ok(TokenErrorBody { error, .. }) => format!("{error} (HTTP {status})"),
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => format!("HTTP {status}: {}", body.trim()),
    }
}
