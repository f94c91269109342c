//! Short-lived loopback HTTP listener receiving the OAuth redirect.
//!
//! A listener honours exactly one callback request. Its socket is released on
//! every exit path: success, exchange failure, timeout, or the caller dropping
//! the future.

use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::{StatusCode, Uri},
    },
    serde::Deserialize,
    tokio::{
        net::TcpListener,
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{Error, Result};

const SUCCESS_BODY: &str =
    "Sign-in complete. You can close this window and return to the application.";

/// Query parameters of an authorization-code redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Tries candidate ports in order until one binds.
#[derive(Debug, Clone)]
pub struct CallbackListener {
    ports: Vec<u16>,
    path: String,
}

impl CallbackListener {
    pub fn new(ports: Vec<u16>, path: impl Into<String>) -> Self {
        Self {
            ports,
            path: path.into(),
        }
    }

    /// Bind the first free candidate port on the loopback interface.
    ///
    /// A port already in use moves on to the next candidate; any other OS
    /// error aborts immediately.
    pub async fn bind(&self) -> Result<BoundListener> {
        for &port in &self.ports {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                    debug!(port, "sign-in callback listener bound");
                    return Ok(BoundListener {
                        listener,
                        port,
                        path: self.path.clone(),
                    });
                },
                Err(e) if is_port_conflict(&e) => {
                    debug!(port, "callback port in use, trying next candidate");
                },
                Err(e) => {
                    return Err(Error::Bind {
                        port,
                        reason: e.to_string(),
                    });
                },
            }
        }
        Err(Error::PortExhausted {
            ports: self.ports.clone(),
        })
    }
}

fn is_port_conflict(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::AddrInUse
}

/// A bound listener that has not yet received its callback.
pub struct BoundListener {
    listener: TcpListener,
    port: u16,
    path: String,
}

impl BoundListener {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI registered with the provider; embeds the bound port.
    ///
    /// Uses the IPv4 loopback literal the listener is bound to, never
    /// `localhost`, which may resolve to `::1` first.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}:{}{}", Ipv4Addr::LOCALHOST, self.port, self.path)
    }

    /// Serve until the single callback arrives, run `exchange` on its code,
    /// answer the browser with a success or failure page, then close.
    pub async fn serve_once<T, F, Fut>(
        self,
        expected_state: &str,
        timeout: Option<Duration>,
        exchange: F,
    ) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (callback_tx, callback_rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(ListenerState::Bound(callback_tx)));
        let server = ServerGuard::spawn(self.listener, HandlerState {
            slot: Arc::clone(&slot),
            path: Arc::from(self.path.as_str()),
        });
        info!(port = self.port, "waiting for sign-in callback");

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, callback_rx)
                .await
                .map_err(|_| Error::CallbackTimeout(limit.as_secs()))?,
            None => callback_rx.await,
        };
        let callback = received
            .map_err(|_| Error::Internal("callback listener stopped unexpectedly".into()))?;

        let outcome = match check_params(callback.params, expected_state) {
            Ok(code) => exchange(code).await,
            Err(e) => Err(e),
        };

        let reply = match &outcome {
            Ok(_) => (StatusCode::OK, SUCCESS_BODY.to_string()),
            Err(e) => (
                StatusCode::BAD_REQUEST,
                format!("Sign-in failed: {e}\n\nYou can close this window."),
            ),
        };
        if callback.reply.send(reply).is_err() {
            debug!("browser disconnected before the sign-in result was sent");
        }

        *slot.lock().await = ListenerState::Closed;
        server.close().await;
        outcome
    }
}

fn check_params(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        return Err(Error::Authorization {
            error,
            description: params.error_description,
        });
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(Error::StateMismatch);
    }
    match params.code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(Error::CallbackExchange(
            "the redirect did not include an authorization code".into(),
        )),
    }
}

struct Callback {
    params: CallbackParams,
    reply: oneshot::Sender<(StatusCode, String)>,
}

/// Bound -> RequestReceived -> Closed; only the `Bound` state accepts a
/// callback.
enum ListenerState {
    Bound(oneshot::Sender<Callback>),
    RequestReceived,
    Closed,
}

#[derive(Clone)]
struct HandlerState {
    slot: Arc<Mutex<ListenerState>>,
    path: Arc<str>,
}

async fn handle_request(
    State(state): State<HandlerState>,
    uri: Uri,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, String) {
    if !uri.path().ends_with(state.path.as_ref()) {
        return (StatusCode::NOT_FOUND, "Not found".into());
    }

    let sender = {
        let mut slot = state.slot.lock().await;
        match std::mem::replace(&mut *slot, ListenerState::RequestReceived) {
            ListenerState::Bound(sender) => sender,
            other => {
                *slot = other;
                warn!("ignoring repeated sign-in callback");
                return (
                    StatusCode::CONFLICT,
                    "This sign-in request was already handled. You can close this window.".into(),
                );
            },
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if sender
        .send(Callback {
            params,
            reply: reply_tx,
        })
        .is_err()
    {
        return (StatusCode::GONE, "Sign-in is no longer in progress.".into());
    }
    reply_rx.await.unwrap_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        "Sign-in was interrupted.".into(),
    ))
}

/// Owns the running server; shuts it down when closed or dropped.
struct ServerGuard {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ServerGuard {
    fn spawn(listener: TcpListener, state: HandlerState) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new().fallback(handle_request).with_state(state);
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "sign-in callback server error");
            }
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        debug!("sign-in callback listener closed");
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
