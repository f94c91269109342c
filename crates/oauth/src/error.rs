/// Failures of the sign-in and token lifecycle.
///
/// The `Display` text of each variant is written for end users: it is shown
/// verbatim by the UI layer. Variants carry owned strings so one outcome can
/// be cloned to every caller waiting on the same interactive login.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(
        "Unable to reach the identity provider at {issuer} ({reason}). Check your proxy, network \
         and VPN settings. Only proxies configured through the HTTP_PROXY, HTTPS_PROXY and \
         NO_PROXY environment variables are supported; proxy auto-configuration is not."
    )]
    Discovery { issuer: String, reason: String },

    #[error(
        "No local port is available for the sign-in callback (tried {ports:?}). Close any other \
         sign-in windows or attempts and try again."
    )]
    PortExhausted { ports: Vec<u16> },

    #[error("Could not start the sign-in callback listener on port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("Sign-in failed while exchanging the authorization code: {0}")]
    CallbackExchange(String),

    #[error("The identity provider rejected the sign-in: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Authorization {
        error: String,
        description: Option<String>,
    },

    #[error("Sign-in callback state did not match this sign-in attempt. Please try again.")]
    StateMismatch,

    #[error("Sign-in was cancelled because you signed out while it was in progress.")]
    LoginCancelled,

    #[error("Timed out after {0}s waiting for the browser to complete sign-in.")]
    CallbackTimeout(u64),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Invalid sign-in configuration: {0}")]
    Config(String),

    #[error("HTTP request to the identity provider failed: {0}")]
    Http(String),

    #[error("Internal sign-in error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure came from the identity provider being unreachable.
    #[must_use]
    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::Discovery { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
