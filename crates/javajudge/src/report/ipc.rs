//! Channel to the external control process
//!
//! The control process listens on a local HTTP endpoint. Verdicts are POSTed
//! as JSON to `/publish`; `/status` answers a liveness probe. Requests carry
//! the shared secret as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::report::{RetryPolicy, VerdictMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to control process failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("control process answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },

    #[error("send cancelled")]
    Cancelled,
}

impl TransportError {
    /// Connection problems and server errors are worth another attempt;
    /// a 4xx answer will not change by repeating the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(_) => true,
            TransportError::Rejected { status, .. } => *status >= 500,
            TransportError::Exhausted { .. } | TransportError::Cancelled => false,
        }
    }
}

/// Send-only link to the control process
#[async_trait]
pub trait IpcTransport: Send + Sync {
    async fn send(&self, message: &VerdictMessage) -> Result<(), TransportError>;

    /// Liveness probe; returns the peer's status text
    async fn status(&self) -> Result<String, TransportError>;
}

/// [`IpcTransport`] over HTTP
pub struct HttpIpcClient {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl HttpIpcClient {
    pub fn new(
        endpoint: &str,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("javajudge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            secret,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.secret {
            Some(secret) => request.bearer_auth(secret),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl IpcTransport for HttpIpcClient {
    async fn send(&self, message: &VerdictMessage) -> Result<(), TransportError> {
        let url = format!("{}/publish", self.endpoint);
        let response = self
            .authorize(self.client.post(&url))
            .json(message)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn status(&self) -> Result<String, TransportError> {
        let url = format!("{}/status", self.endpoint);
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::check(response).await
    }
}

/// Send `message` until it is accepted, the policy runs out, or `cancel`
/// fires. Returns the number of attempts made.
#[instrument(skip_all, fields(key = %message.key()))]
pub async fn send_with_retry(
    transport: &dyn IpcTransport,
    message: &VerdictMessage,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<u32, TransportError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let err = match transport.send(message).await {
            Ok(()) => {
                debug!(attempt, "verdict delivered");
                return Ok(attempt);
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            return Err(TransportError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let backoff = policy.backoff(attempt);
        warn!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "send failed, retrying");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        }
        attempt += 1;
    }
}
