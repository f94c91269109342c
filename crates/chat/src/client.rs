use std::{pin::Pin, sync::Arc};

use {
    futures::StreamExt,
    secrecy::ExposeSecret,
    skylark_oauth::AccessTokenSource,
    tokio_stream::Stream,
    tracing::{debug, warn},
};

use crate::{
    error::{self, Error, Result},
    identity::ClientIdentity,
    sse::{Frame, LineBuffer, parse_line},
    types::{ChatMessage, Completion, StreamEvent},
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Chat-completions client that authenticates every request with the
/// current access token.
pub struct ChatClient {
    tokens: Arc<dyn AccessTokenSource>,
    http: reqwest::Client,
    base_url: String,
    model: String,
    identity: ClientIdentity,
}

impl ChatClient {
    pub fn new(
        tokens: Arc<dyn AccessTokenSource>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            identity: ClientIdentity::default(),
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and stream back the response.
    ///
    /// Fails before any network call if there is no valid token. HTTP errors
    /// are reported here; failures after the response started arrive as an
    /// `Err` item, after which the stream ends.
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<EventStream> {
        let Some(token) = self.tokens.access_token().await else {
            return Err(Error::AuthenticationRequired);
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        #[cfg(feature = "metrics")]
        skylark_metrics::counter!(skylark_metrics::chat::REQUESTS_TOTAL).increment(1);

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.identity.headers()?)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .inspect_err(|_| record_failure())?;

        let status = resp.status();
        if !status.is_success() {
            record_failure();
            let headers = resp.headers().clone();
            let body_text = resp.text().await.unwrap_or_default();
            let err = Error::from_response(status, &headers, &body_text);
            warn!(status = status.as_u16(), error = %err, "chat request failed");
            return Err(err);
        }

        let request_id = error::request_id(resp.headers());
        debug!(model = %self.model, request_id = ?request_id, "chat stream started");

        let mut bytes = resp.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut lines = LineBuffer::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        record_failure();
                        warn!(error = %e, request_id = ?request_id, "chat stream interrupted");
                        yield Err(Error::Stream(e.to_string()));
                        return;
                    },
                };
                for line in lines.push(&chunk) {
                    match parse_line(&line) {
                        Some(Frame::Done) => return,
                        Some(Frame::Events(events)) => {
                            for event in events {
                                yield Ok(event);
                            }
                        },
                        Some(Frame::Error(detail)) => {
                            yield Err(stream_error(detail, request_id.clone()));
                            return;
                        },
                        None => {},
                    }
                }
            }
            match lines.finish().as_deref().and_then(parse_line) {
                Some(Frame::Events(events)) => {
                    for event in events {
                        yield Ok(event);
                    }
                },
                Some(Frame::Error(detail)) => {
                    yield Err(stream_error(detail, request_id.clone()));
                },
                Some(Frame::Done) | None => {},
            }
        }))
    }

    /// Send `messages` and wait for the whole response.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let mut stream = self.stream(messages).await?;
        let mut completion = Completion::default();
        while let Some(event) = stream.next().await {
            completion.push(event?);
        }
        Ok(completion)
    }
}

/// A failure the provider reported after the response had started.
fn stream_error(detail: String, request_id: Option<String>) -> Error {
    record_failure();
    let err = Error::Upstream {
        status: None,
        message: format!("The chat service reported an error mid-response: {detail}"),
        request_id,
    };
    warn!(error = %err, "chat stream carried a provider error");
    err
}

fn record_failure() {
    #[cfg(feature = "metrics")]
    skylark_metrics::counter!(skylark_metrics::chat::REQUEST_FAILURES_TOTAL).increment(1);
}
