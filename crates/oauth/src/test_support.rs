//! Fake identity provider and browser for unit tests.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Form, Json, Router,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde_json::json,
    tokio::net::TcpListener,
};

use crate::{backoff::RetryPolicy, clock::Clock, manager::UrlOpener};

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

/// Settable wall clock.
pub struct FakeClock(AtomicU64);

impl FakeClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct IdpState {
    pub issuer: std::sync::OnceLock<String>,
    pub discovery_calls: AtomicUsize,
    /// Number of upcoming discovery requests answered with HTTP 503.
    pub fail_discovery: AtomicUsize,
    pub code_exchanges: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub reject_refresh: AtomicBool,
    pub reject_code: AtomicBool,
    pub expires_in: AtomicUsize,
    /// Last form posted to the token endpoint.
    pub last_form: std::sync::Mutex<HashMap<String, String>>,
}

/// Minimal OIDC provider: discovery, authorize (unused) and token endpoints.
pub struct MockIdp {
    pub addr: SocketAddr,
    pub state: Arc<IdpState>,
}

impl MockIdp {
    pub async fn start() -> Self {
        let state = Arc::new(IdpState {
            expires_in: AtomicUsize::new(3600),
            ..IdpState::default()
        });
        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/token", post(token))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = state.issuer.set(format!("http://{addr}"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { addr, state }
    }

    pub fn issuer(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Response {
    state.discovery_calls.fetch_add(1, Ordering::SeqCst);
    let pending = state.fail_discovery.load(Ordering::SeqCst);
    if pending > 0 {
        state.fail_discovery.store(pending - 1, Ordering::SeqCst);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let issuer = state.issuer.get().cloned().unwrap_or_default();
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "code_challenge_methods_supported": ["S256"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
    }))
    .into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    *state.last_form.lock().unwrap() = form.clone();
    let expires_in = state.expires_in.load(Ordering::SeqCst);
    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let n = state.code_exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            if state.reject_code.load(Ordering::SeqCst) {
                return invalid_grant("authorization code expired");
            }
            Json(json!({
                "access_token": format!("access-{n}"),
                "refresh_token": format!("refresh-{n}"),
                "id_token": "id",
                "token_type": "Bearer",
                "scope": "openid offline_access",
                "expires_in": expires_in,
            }))
            .into_response()
        },
        Some("refresh_token") => {
            let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if state.reject_refresh.load(Ordering::SeqCst) {
                return invalid_grant("refresh token revoked");
            }
            Json(json!({
                "access_token": format!("refreshed-access-{n}"),
                "token_type": "Bearer",
                "expires_in": expires_in,
            }))
            .into_response()
        },
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "unsupported_grant_type" })))
            .into_response(),
    }
}

fn invalid_grant(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant", "error_description": description })),
    )
        .into_response()
}

/// Plays the browser: follows the authorization URL straight back to the
/// redirect URI with a code and the original state.
#[derive(Default)]
pub struct FakeBrowser {
    pub opened: std::sync::Mutex<Vec<String>>,
    /// Open the URL without completing the redirect.
    pub stall: AtomicBool,
}

impl UrlOpener for FakeBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        if self.stall.load(Ordering::SeqCst) {
            return Ok(());
        }
        let parsed = url::Url::parse(url).map_err(std::io::Error::other)?;
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let redirect = params.get("redirect_uri").cloned().unwrap_or_default();
        let state = params.get("state").cloned().unwrap_or_default();
        tokio::spawn(async move {
            let _ = reqwest::get(format!("{redirect}?code=auth-code&state={state}")).await;
        });
        Ok(())
    }
}
