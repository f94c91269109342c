pub mod backoff;
pub mod callback_server;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod pkce;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    backoff::{RetryPolicy, retry_with_backoff},
    callback_server::{BoundListener, CallbackListener, CallbackParams},
    clock::{Clock, SystemClock},
    discovery::{DiscoveryClient, DiscoveryConfig},
    manager::{AccessTokenSource, SystemBrowser, TokenManager, TokenManagerBuilder, UrlOpener},
    pkce::PkceChallenge,
    storage::{FileSecretStore, MemorySecretStore, SecretStore, TokenStore},
    types::{OAuthConfig, TokenRecord, TokenResponse, serialize_option_secret},
};

pub use error::{Error, Result};
