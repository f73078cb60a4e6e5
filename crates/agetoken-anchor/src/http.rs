//! HTTP bulletin board client
//!
//! Talks to a board exposing:
//!
//! - `GET  {base}/state`        → [`PublishedState`]
//! - `POST {base}/transitions`  ← [`StateTransition`], → [`TransactionReceipt`]
//!
//! Refusals (`401`, `403`, `409`, `422`) map to
//! [`AnchorError::PublishRejected`]; connection failures, timeouts and `5xx`
//! map to [`AnchorError::Unreachable`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::anchor::TrustAnchor;
use crate::error::{AnchorError, Result};
use crate::types::{PublishedState, StateTransition, TransactionReceipt};

/// Default per-request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a remote JSON bulletin board
#[derive(Debug, Clone)]
pub struct HttpAnchor {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpAnchor {
    /// Create a client for the board at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Base URL of the board
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn classify_failure(status: StatusCode, body: String) -> AnchorError {
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => AnchorError::PublishRejected(format!("{}: {}", status, body)),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            AnchorError::Unreachable(format!("{}: {}", status, body))
        }
        _ => AnchorError::InvalidResponse(format!("unexpected status {}: {}", status, body)),
    }
}

#[async_trait]
impl TrustAnchor for HttpAnchor {
    async fn read_state(&self) -> Result<PublishedState> {
        let url = self.url("state");
        debug!(url = %url, "Reading anchor state");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }
        Ok(response.json::<PublishedState>().await?)
    }

    async fn submit(&self, transition: StateTransition) -> Result<TransactionReceipt> {
        let url = self.url("transitions");
        debug!(
            url = %url,
            kind = transition.update.kind(),
            publisher = %transition.publisher,
            "Submitting anchor transition"
        );

        let response = self.http_client.post(&url).json(&transition).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }
        Ok(response.json::<TransactionReceipt>().await?)
    }

    fn description(&self) -> String {
        format!("http bulletin board at {}", self.base_url)
    }
}
