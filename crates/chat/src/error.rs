use reqwest::{StatusCode, header::HeaderMap};

/// Response header carrying the provider's request correlation id.
pub const REQUEST_ID_HEADER: &str = "opc-request-id";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("You are not signed in. Run `skylark auth login` and try again.")]
    AuthenticationRequired,

    #[error("{message}{}", .request_id.as_deref().map(|id| format!(" ({REQUEST_ID_HEADER}: {id})")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
        request_id: Option<String>,
    },

    #[error("The chat response stream was interrupted: {0}")]
    Stream(String),

    #[error("Invalid chat client configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Turn a failed chat response into one readable message.
    pub(crate) fn from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let detail = provider_message(body);
        let message = match status.as_u16() {
            401 | 403 => format!(
                "The chat service rejected your credentials (HTTP {}): {detail}. Run `skylark \
                 auth login` to sign in again.",
                status.as_u16()
            ),
            429 => format!("The chat service is rate limiting requests: {detail}. Try again shortly."),
            500..=599 => format!(
                "The chat service is unavailable (HTTP {}): {detail}",
                status.as_u16()
            ),
            code => format!("Chat request failed (HTTP {code}): {detail}"),
        };
        Self::Upstream {
            status: Some(status.as_u16()),
            message,
            request_id: request_id(headers),
        }
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// The provider's own error text, from the usual JSON shapes or the raw body.
pub(crate) fn provider_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let found = json
            .pointer("/error/message")
            .or_else(|| json.get("message"))
            .or_else(|| json.get("detail"))
            .or_else(|| json.get("error"))
            .and_then(|v| v.as_str());
        if let Some(text) = found {
            return text.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no details returned".into()
    } else {
        trimmed.chars().take(500).collect()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(id: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(id) = id {
            map.insert(REQUEST_ID_HEADER, HeaderValue::from_str(id).unwrap());
        }
        map
    }

    #[test]
    fn appends_request_id_when_present() {
        let err = Error::from_response(
            StatusCode::BAD_REQUEST,
            &headers(Some("req-42")),
            r#"{"error":{"message":"model not found"}}"#,
        );
        assert_eq!(
            err.to_string(),
            "Chat request failed (HTTP 400): model not found (opc-request-id: req-42)"
        );
    }

    #[test]
    fn omits_request_id_when_absent() {
        let err = Error::from_response(StatusCode::BAD_GATEWAY, &headers(None), "upstream down");
        assert_eq!(err.to_string(), "The chat service is unavailable (HTTP 502): upstream down");
    }

    #[test]
    fn unauthorized_suggests_sign_in() {
        let err = Error::from_response(
            StatusCode::UNAUTHORIZED,
            &headers(None),
            r#"{"message":"token expired"}"#,
        );
        let text = err.to_string();
        assert!(text.contains("token expired"));
        assert!(text.contains("skylark auth login"));
    }

    #[test]
    fn rate_limit_and_empty_body() {
        let err = Error::from_response(StatusCode::TOO_MANY_REQUESTS, &headers(Some(" ")), "");
        assert_eq!(
            err.to_string(),
            "The chat service is rate limiting requests: no details returned. Try again shortly."
        );
    }

    #[test]
    fn authentication_required_message() {
        assert!(Error::AuthenticationRequired.to_string().contains("auth login"));
    }
}
