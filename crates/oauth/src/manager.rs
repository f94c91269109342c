//! Token lifecycle: cached validity checks, silent refresh, single-flight
//! interactive sign-in, and sign-out.
//!
//! The manager is the only writer of the in-process token cache and of the
//! durable token store. Tokens are swapped as whole records, so a reader sees
//! either the previous record or the new one.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    futures::future::{BoxFuture, FutureExt, Shared},
    secrecy::SecretString,
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    callback_server::CallbackListener,
    clock::{Clock, SystemClock},
    discovery::DiscoveryClient,
    pkce::{self, PkceChallenge},
    storage::{SecretStore, TokenStore},
    types::{OAuthConfig, TokenRecord},
};

/// Opens the authorization URL for the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Read access to the current valid access token.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// `None` means the user has to sign in.
    async fn access_token(&self) -> Option<SecretString>;
}

type LoginOutcome = Result<TokenRecord>;
type SharedLogin = Shared<BoxFuture<'static, LoginOutcome>>;

struct InFlight {
    id: u64,
    login: SharedLogin,
}

struct Inner {
    config: OAuthConfig,
    discovery: DiscoveryClient,
    store: TokenStore,
    clock: Arc<dyn Clock>,
    opener: Arc<dyn UrlOpener>,
    cache: RwLock<Option<TokenRecord>>,
    in_flight: Mutex<Option<InFlight>>,
    next_login_id: AtomicU64,
}

/// Owns the token state for one identity provider and client.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

pub struct TokenManagerBuilder {
    config: OAuthConfig,
    backend: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    opener: Arc<dyn UrlOpener>,
    http: Option<reqwest::Client>,
}

impl TokenManagerBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.opener = opener;
        self
    }

    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<TokenManager> {
        self.config.validate()?;
        let mut discovery = DiscoveryClient::new(
            self.config.issuer.clone(),
            self.config.client_id.clone(),
            self.config.discovery_retry,
            self.config.discovery_ttl,
        );
        if let Some(http) = self.http {
            discovery = discovery.with_http_client(http);
        }
        let store = TokenStore::new(self.backend, self.config.storage_key.clone());
        Ok(TokenManager {
            inner: Arc::new(Inner {
                config: self.config,
                discovery,
                store,
                clock: self.clock,
                opener: self.opener,
                cache: RwLock::new(None),
                in_flight: Mutex::new(None),
                next_login_id: AtomicU64::new(0),
            }),
        })
    }
}

impl TokenManager {
    pub fn builder(config: OAuthConfig, backend: Arc<dyn SecretStore>) -> TokenManagerBuilder {
        TokenManagerBuilder {
            config,
            backend,
            clock: Arc::new(SystemClock),
            opener: Arc::new(SystemBrowser),
            http: None,
        }
    }

    pub fn new(config: OAuthConfig, backend: Arc<dyn SecretStore>) -> Result<Self> {
        Self::builder(config, backend).build()
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    /// The cached or stored record, without validity checks or refresh.
    pub async fn current(&self) -> Option<TokenRecord> {
        if let Some(record) = self.inner.cache.read().await.clone() {
            return Some(record);
        }
        let loaded = self.inner.store.load().await?;
        debug!("loaded token from storage");
        *self.inner.cache.write().await = Some(loaded.clone());
        Some(loaded)
    }

    /// A token that stays valid for at least the renew buffer, refreshing
    /// silently if needed.
    ///
    /// Never fails: a missing token, a failed refresh and an unreachable
    /// provider all come back as `None`.
    pub async fn get_valid(&self) -> Option<TokenRecord> {
        let current = self.current().await?;
        if current.is_fresh(self.inner.clock.now(), self.inner.config.renew_buffer) {
            return Some(current);
        }

        let Some(refresh_token) = current.refresh_token.clone().filter(|_| current.has_refresh_token())
        else {
            debug!("token expired and cannot be refreshed");
            return None;
        };

        match self.inner.refresh(refresh_token).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "silent token refresh failed");
                None
            },
        }
    }

    /// Return a valid token, or run the interactive browser sign-in.
    ///
    /// `on_url` receives the authorization URL once the callback listener is
    /// bound, before the browser is opened. Concurrent callers share a single
    /// sign-in: only the caller that starts it has `on_url` invoked, and all
    /// of them receive the same outcome.
    pub async fn login_without_auto_open<F>(&self, on_url: F) -> Result<TokenRecord>
    where
        F: FnOnce(&str) + Send + 'static,
    {
        if let Some(record) = self.get_valid().await {
            return Ok(record);
        }

        let login = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(login_id = in_flight.id, "joining sign-in already in progress");
                    in_flight.login.clone()
                },
                None => {
                    // A sign-in may have settled while this caller was refreshing.
                    if let Some(record) = self.fresh_cached().await {
                        return Ok(record);
                    }
                    let id = self.inner.next_login_id.fetch_add(1, Ordering::Relaxed);
                    let login = self.spawn_login(id, Box::new(on_url));
                    *slot = Some(InFlight {
                        id,
                        login: login.clone(),
                    });
                    login
                },
            }
        };
        login.await
    }

    /// Forget the token in memory and in storage. Storage failures are logged.
    ///
    /// A sign-in still in progress is withdrawn: if it completes later, its
    /// token is discarded and its callers receive [`Error::LoginCancelled`].
    pub async fn logout(&self) {
        let mut slot = self.inner.in_flight.lock().await;
        slot.take();
        *self.inner.cache.write().await = None;
        self.inner.store.delete().await;
        drop(slot);
        info!("signed out");
    }

    async fn fresh_cached(&self) -> Option<TokenRecord> {
        let now = self.inner.clock.now();
        self.inner
            .cache
            .read()
            .await
            .clone()
            .filter(|r| r.is_fresh(now, self.inner.config.renew_buffer))
    }

    fn spawn_login(&self, id: u64, on_url: Box<dyn FnOnce(&str) + Send>) -> SharedLogin {
        let inner = Arc::clone(&self.inner);
        // Runs to completion even if every waiting caller goes away.
        let task = tokio::spawn(async move {
            let outcome = inner.interactive_login(id, on_url).await;
            let mut slot = inner.in_flight.lock().await;
            if slot.as_ref().is_some_and(|f| f.id == id) {
                *slot = None;
            }
            outcome
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Internal(format!("sign-in task failed: {e}"))))
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn refresh(&self, refresh_token: SecretString) -> Result<TokenRecord> {
        debug!("refreshing access token");
        let response = match self.discovery.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "metrics")]
                skylark_metrics::counter!(skylark_metrics::oauth::REFRESH_FAILURES_TOTAL)
                    .increment(1);
                if !e.is_discovery() {
                    // Endpoints may have moved; re-resolve them next time.
                    self.discovery.invalidate().await;
                }
                return Err(e);
            },
        };
        let record = TokenRecord::from_response(response, self.clock.now(), Some(refresh_token));
        self.commit(&record).await;
        #[cfg(feature = "metrics")]
        skylark_metrics::counter!(skylark_metrics::oauth::REFRESHES_TOTAL).increment(1);
        info!(expires_at = record.expires_at, "access token refreshed");
        Ok(record)
    }

    async fn interactive_login(
        &self,
        id: u64,
        on_url: Box<dyn FnOnce(&str) + Send>,
    ) -> Result<TokenRecord> {
        let result = self.run_login(id, on_url).await;
        match &result {
            Ok(record) => {
                #[cfg(feature = "metrics")]
                skylark_metrics::counter!(skylark_metrics::oauth::LOGINS_TOTAL).increment(1);
                info!(expires_at = record.expires_at, "sign-in complete");
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                skylark_metrics::counter!(skylark_metrics::oauth::LOGIN_FAILURES_TOTAL)
                    .increment(1);
                warn!(error = %e, "sign-in failed");
            },
        }
        result
    }

    async fn run_login(&self, id: u64, on_url: Box<dyn FnOnce(&str) + Send>) -> Result<TokenRecord> {
        info!(issuer = %self.config.issuer, "starting interactive sign-in");
        let metadata = self.discovery.config().await?;

        let pkce = self.config.use_pkce.then(|| {
            if !metadata.supports_s256() {
                warn!(
                    methods = ?metadata.code_challenge_methods_supported,
                    "identity provider does not advertise S256 PKCE"
                );
            }
            PkceChallenge::generate()
        });
        let state = pkce::random_state();

        let listener =
            CallbackListener::new(self.config.ports.clone(), self.config.callback_path.clone())
                .bind()
                .await?;
        let redirect_uri = listener.redirect_uri();
        let url = self.discovery.authorization_url(
            &metadata,
            &redirect_uri,
            &self.config.scopes,
            &state,
            pkce.as_ref(),
        )?;

        on_url(&url);
        if let Err(e) = self.opener.open(&url) {
            warn!(error = %e, "could not open the browser, use the displayed sign-in URL");
        }

        let verifier = pkce.as_ref().map(|p| p.verifier.as_str());
        let response = listener
            .serve_once(&state, self.config.callback_timeout, |code| async move {
                self.discovery
                    .exchange_code(&code, &redirect_uri, verifier)
                    .await
            })
            .await?;

        let record = TokenRecord::from_response(response, self.clock.now(), None);

        // Held across the commit so a concurrent logout either sees this
        // token and removes it, or has already withdrawn this sign-in.
        let slot = self.in_flight.lock().await;
        if !slot.as_ref().is_some_and(|f| f.id == id) {
            info!(login_id = id, "signed out during sign-in, discarding token");
            return Err(Error::LoginCancelled);
        }
        self.commit(&record).await;
        drop(slot);
        Ok(record)
    }

    /// Publish a new record to the cache and mirror it to storage.
    async fn commit(&self, record: &TokenRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(error = %e, "failed to persist token, keeping it in memory only");
        }
        *self.cache.write().await = Some(record.clone());
    }
}

#[async_trait]
impl AccessTokenSource for TokenManager {
    async fn access_token(&self) -> Option<SecretString> {
        self.get_valid().await.and_then(|record| record.access_token)
    }
}
