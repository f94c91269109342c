use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize, Serializer},
};

use crate::backoff::RetryPolicy;

/// Seconds before `expires_at` at which a cached token stops being handed out.
pub const DEFAULT_RENEW_BUFFER: Duration = Duration::from_secs(180);

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// OAuth 2.0 / OIDC client configuration, supplied by the host environment.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Issuer base URL; discovery is fetched from
    /// `<issuer>/.well-known/openid-configuration`.
    pub issuer: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Local ports tried in order for the redirect listener.
    pub ports: Vec<u16>,
    /// Path of the redirect endpoint, e.g. `/callback`.
    pub callback_path: String,
    pub use_pkce: bool,
    /// Key under which the serialized [`TokenRecord`] is stored.
    pub storage_key: String,
    pub renew_buffer: Duration,
    pub discovery_retry: RetryPolicy,
    /// `None` caches discovery for the process lifetime.
    pub discovery_ttl: Option<Duration>,
    /// `None` waits for the browser indefinitely.
    pub callback_timeout: Option<Duration>,
}

impl OAuthConfig {
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            scopes: vec!["openid".into(), "offline_access".into()],
            ports: vec![8669, 8670, 8671, 8672, 8673],
            callback_path: "/callback".into(),
            use_pkce: true,
            storage_key: "skylark.oauth.token".into(),
            renew_buffer: DEFAULT_RENEW_BUFFER,
            discovery_retry: RetryPolicy::default(),
            discovery_ttl: Some(Duration::from_secs(3600)),
            callback_timeout: Some(Duration::from_secs(300)),
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(crate::Error::Config("issuer URL is empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(crate::Error::Config("client id is empty".into()));
        }
        if self.ports.is_empty() {
            return Err(crate::Error::Config("no callback ports configured".into()));
        }
        if !self.callback_path.starts_with('/') {
            return Err(crate::Error::Config(format!(
                "callback path must start with '/': {}",
                self.callback_path
            )));
        }
        Ok(())
    }
}

/// Raw token endpoint response, for both the `authorization_code` and
/// `refresh_token` grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub id_token: Option<SecretString>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Persisted authentication state.
///
/// `expires_at` is always computed locally from `expires_in` at the moment the
/// response was received; it is never taken from the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default, serialize_with = "serialize_option_secret")]
    pub access_token: Option<SecretString>,
    #[serde(default, serialize_with = "serialize_option_secret")]
    pub refresh_token: Option<SecretString>,
    #[serde(default, serialize_with = "serialize_option_secret")]
    pub id_token: Option<SecretString>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub expires_in: u64,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: u64,
}

impl TokenRecord {
    /// Build a record from a token endpoint response received at `now`.
    ///
    /// `previous_refresh` is kept when the provider does not rotate the
    /// refresh token.
    pub fn from_response(
        resp: TokenResponse,
        now: u64,
        previous_refresh: Option<SecretString>,
    ) -> Self {
        let expires_in = resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        Self {
            access_token: Some(resp.access_token),
            refresh_token: resp.refresh_token.or(previous_refresh),
            id_token: resp.id_token,
            token_type: resp.token_type,
            scope: resp.scope,
            expires_in,
            expires_at: now.saturating_add(expires_in),
        }
    }

    /// Usable at `now` if an access token exists and it does not expire
    /// within `buffer`.
    #[must_use]
    pub fn is_fresh(&self, now: u64, buffer: Duration) -> bool {
        self.access_token.is_some() && now < self.expires_at.saturating_sub(buffer.as_secs())
    }

    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }

    #[must_use]
    pub fn access_token_str(&self) -> Option<&str> {
        self.access_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

impl PartialEq for TokenRecord {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &Option<SecretString>, b: &Option<SecretString>) -> bool {
            a.as_ref().map(|s| s.expose_secret()) == b.as_ref().map(|s| s.expose_secret())
        }
        same(&self.access_token, &other.access_token)
            && same(&self.refresh_token, &other.refresh_token)
            && same(&self.id_token, &other.id_token)
            && self.token_type == other.token_type
            && self.scope == other.scope
            && self.expires_in == other.expires_in
            && self.expires_at == other.expires_at
    }
}

impl Eq for TokenRecord {}

/// Serialize an optional secret as its plain value, for durable storage.
pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(expires_in: Option<u64>, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: SecretString::new("at".into()),
            refresh_token: refresh.map(|r| SecretString::new(r.into())),
            id_token: None,
            token_type: Some("Bearer".into()),
            scope: Some("openid".into()),
            expires_in,
        }
    }

    #[test]
    fn expires_at_is_derived_from_local_time() {
        let rec = TokenRecord::from_response(response(Some(600), None), 1_000, None);
        assert_eq!(rec.expires_in, 600);
        assert_eq!(rec.expires_at, 1_600);
    }

    #[test]
    fn missing_expires_in_uses_default() {
        let rec = TokenRecord::from_response(response(None, None), 0, None);
        assert_eq!(rec.expires_at, DEFAULT_EXPIRES_IN);
    }

    #[test]
    fn refresh_token_is_carried_over_when_not_rotated() {
        let old = Some(SecretString::new("old-rt".into()));
        let kept = TokenRecord::from_response(response(Some(60), None), 0, old.clone());
        assert_eq!(
            kept.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("old-rt")
        );

        let rotated = TokenRecord::from_response(response(Some(60), Some("new-rt")), 0, old);
        assert_eq!(
            rotated
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().as_str()),
            Some("new-rt")
        );
    }

    #[test]
    fn freshness_honours_renew_buffer() {
        let rec = TokenRecord::from_response(response(Some(600), None), 1_000, None);
        let buffer = DEFAULT_RENEW_BUFFER;
        assert!(rec.is_fresh(1_000, buffer));
        assert!(rec.is_fresh(1_419, buffer));
        assert!(!rec.is_fresh(1_420, buffer));
        assert!(!rec.is_fresh(2_000, buffer));
    }

    #[test]
    fn record_without_access_token_is_never_fresh() {
        let rec = TokenRecord {
            access_token: None,
            refresh_token: None,
            id_token: None,
            token_type: None,
            scope: None,
            expires_in: 3600,
            expires_at: u64::MAX,
        };
        assert!(!rec.is_fresh(0, DEFAULT_RENEW_BUFFER));
    }

    #[test]
    fn serialized_record_round_trips() {
        let rec = TokenRecord::from_response(response(Some(900), Some("rt")), 42, None);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"access_token\":\"at\""));
        let back: TokenRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rec = TokenRecord::from_response(response(Some(900), Some("super-secret")), 0, None);
        let dbg = format!("{rec:?}");
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn config_validation() {
        let cfg = OAuthConfig::new("https://idp.example.com", "client");
        assert!(cfg.validate().is_ok());

        let mut no_ports = cfg.clone();
        no_ports.ports.clear();
        assert!(matches!(no_ports.validate(), Err(crate::Error::Config(_))));

        let mut bad_path = cfg;
        bad_path.callback_path = "callback".into();
        assert!(bad_path.validate().is_err());
    }
}
