use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    skylark_chat::ClientIdentity,
    skylark_oauth::{FileSecretStore, OAuthConfig},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkylarkConfig {
    pub auth: AuthConfig,
    pub chat: ChatConfig,
}

/// `[auth]`: identity provider and sign-in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub issuer: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Callback ports, tried in order.
    pub ports: Vec<u16>,
    pub callback_path: String,
    pub use_pkce: bool,
    /// `0` caches provider metadata for the life of the process.
    pub discovery_ttl_secs: u64,
    /// `0` waits for the browser indefinitely.
    pub callback_timeout_secs: u64,
    pub renew_buffer_secs: u64,
    pub storage_key: String,
    /// Defaults to the platform data directory.
    pub token_dir: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let base = OAuthConfig::new("", "");
        Self {
            issuer: String::new(),
            client_id: String::new(),
            scopes: base.scopes,
            ports: base.ports,
            callback_path: base.callback_path,
            use_pkce: base.use_pkce,
            discovery_ttl_secs: secs(base.discovery_ttl),
            callback_timeout_secs: secs(base.callback_timeout),
            renew_buffer_secs: base.renew_buffer.as_secs(),
            storage_key: base.storage_key,
            token_dir: None,
        }
    }
}

fn secs(d: Option<Duration>) -> u64 {
    d.map_or(0, |d| d.as_secs())
}

fn optional(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl AuthConfig {
    pub fn oauth_config(&self) -> OAuthConfig {
        let mut config = OAuthConfig::new(self.issuer.trim_end_matches('/'), &self.client_id);
        config.scopes = self.scopes.clone();
        config.ports = self.ports.clone();
        config.callback_path = self.callback_path.clone();
        config.use_pkce = self.use_pkce;
        config.discovery_ttl = optional(self.discovery_ttl_secs);
        config.callback_timeout = optional(self.callback_timeout_secs);
        config.renew_buffer = Duration::from_secs(self.renew_buffer_secs);
        config.storage_key = self.storage_key.clone();
        config
    }

    pub fn secret_store(&self) -> anyhow::Result<FileSecretStore> {
        let dir = match &self.token_dir {
            Some(dir) => dir.clone(),
            None => FileSecretStore::default_dir()?,
        };
        Ok(FileSecretStore::new(dir))
    }
}

/// `[chat]`: the chat-completions service and how this client identifies
/// itself to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub client_name: String,
    pub client_version: String,
    pub ide_name: String,
    pub ide_version: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let id = ClientIdentity::default();
        Self {
            base_url: String::new(),
            model: "default".into(),
            client_name: id.name,
            client_version: id.version,
            ide_name: id.ide_name,
            ide_version: id.ide_version,
        }
    }
}

impl ChatConfig {
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
            ide_name: self.ide_name.clone(),
            ide_version: self.ide_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_oauth_defaults() {
        let auth = AuthConfig::default();
        assert_eq!(auth.ports, vec![8669, 8670, 8671, 8672, 8673]);
        assert_eq!(auth.renew_buffer_secs, 180);
        assert_eq!(auth.callback_timeout_secs, 300);
        assert!(auth.use_pkce);
    }

    #[test]
    fn zero_durations_disable_limits() {
        let auth = AuthConfig {
            issuer: "https://id.example.com/".into(),
            client_id: "cli".into(),
            discovery_ttl_secs: 0,
            callback_timeout_secs: 0,
            ..AuthConfig::default()
        };
        let oauth = auth.oauth_config();
        assert_eq!(oauth.issuer, "https://id.example.com");
        assert_eq!(oauth.discovery_ttl, None);
        assert_eq!(oauth.callback_timeout, None);
    }

    #[test]
    fn explicit_token_dir_is_used() {
        let auth = AuthConfig {
            token_dir: Some("/tmp/skylark-tokens".into()),
            ..AuthConfig::default()
        };
        let store = auth.secret_store().unwrap();
        assert_eq!(store.dir(), std::path::Path::new("/tmp/skylark-tokens"));
    }
}
