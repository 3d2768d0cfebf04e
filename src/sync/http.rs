//! HTTP implementation of [`RemoteApply`].
//!
//! Each entity type maps to one collection endpoint under the base URL:
//! `create` is a `POST`, `update` a `PUT` and `delete` a `DELETE`, all with
//! the payload as JSON body and the entry id as `Idempotency-Key`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use super::monitor::Connectivity;
use super::remote::RemoteApply;
use crate::config::RemoteConfig;
use crate::error::{QueueError, RemoteApplyError};
use crate::queue::{Operation, QueueEntry};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Remote apply over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    health_url: String,
    timeout: Duration,
}

impl HttpRemote {
    /// Build a client for the configured remote.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Config` if no base URL is configured or the
    /// HTTP client cannot be built.
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self, QueueError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QueueError::Config("remote.base_url is not set".to_string()))?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| QueueError::Config(format!("Failed to build HTTP client: {e}")))?;

        let health_url = format!("{base_url}/{}", config.health_path.trim_start_matches('/'));

        Ok(Self {
            client,
            base_url,
            health_url,
            timeout,
        })
    }

    /// Collection URL for an entity type.
    #[must_use]
    pub fn endpoint(&self, entity_type: &str) -> String {
        format!("{}/{entity_type}", self.base_url)
    }

    /// Check whether the remote answers its health endpoint.
    pub async fn probe(&self) -> Connectivity {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => Connectivity::Online,
            Ok(response) => {
                debug!(status = %response.status(), "Health check rejected");
                Connectivity::Offline
            },
            Err(e) => {
                debug!(error = %e, "Health check failed");
                Connectivity::Offline
            },
        }
    }

    fn classify(&self, e: &reqwest::Error) -> RemoteApplyError {
        if e.is_timeout() {
            RemoteApplyError::Timeout(self.timeout)
        } else if e.is_connect() {
            RemoteApplyError::Offline(e.to_string())
        } else {
            RemoteApplyError::Other(e.to_string())
        }
    }
}

fn method_for(operation: Operation) -> Method {
    match operation {
        Operation::Create => Method::POST,
        Operation::Update => Method::PUT,
        Operation::Delete => Method::DELETE,
    }
}

#[async_trait]
impl RemoteApply for HttpRemote {
    async fn apply(&self, entry: &QueueEntry) -> Result<(), RemoteApplyError> {
        let response = self
            .client
            .request(method_for(entry.operation), self.endpoint(&entry.entity_type))
            .header("Idempotency-Key", entry.id.to_string())
            .json(&entry.payload)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|&i| message.is_char_boundary(i))
                .unwrap_or(0);
            message.truncate(cut);
        }

        Err(RemoteApplyError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
