//! HTTP collector delivery.
//!
//! POSTs the buffer as a JSON array. Anything other than a 2xx answer counts as
//! a failed delivery.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::Delivery;
use crate::entry::LogEntry;
use crate::error::DeliveryError;

/// HTTP request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers batches to a remote collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    url: String,
    client: reqwest::Client,
}

impl HttpDelivery {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, HTTP_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(entries)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(count = entries.len(), url = %self.url, "Batch posted");
            Ok(())
        } else {
            Err(DeliveryError::Server(status.as_u16()))
        }
    }
}
