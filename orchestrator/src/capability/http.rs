//! JSON-over-HTTP capability adapter.
//!
//! POSTs the [`CapabilityRequest`] to a fixed URL and expects a
//! [`CapabilityOutput`] body back.
//!
//! | Response                         | Maps to                      |
//! |----------------------------------|------------------------------|
//! | connect error                    | `Unavailable`                |
//! | client-side timeout              | `Timeout`                    |
//! | 429, 502, 503, 504, other 5xx    | `Unavailable`                |
//! | other 4xx                        | `Failed`                     |
//! | 2xx with unparseable body        | `Failed`                     |

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::{Capability, CapabilityError, CapabilityOutput, CapabilityRequest};

/// Capability served by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpCapability {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpCapability {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn classify_status(status: StatusCode, body: &str) -> CapabilityError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CapabilityError::Unavailable(detail)
    } else {
        CapabilityError::Failed(detail)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

#[async_trait]
impl Capability for HttpCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        debug!(
            capability = %self.name,
            url = %self.url,
            task_id = %request.task_id,
            stage = request.stage_index,
            "POST capability request"
        );

        let response = self
            .client
            .post(&self.url)
            .timeout(Duration::from_millis(request.timeout_ms))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout
                } else {
                    CapabilityError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<CapabilityOutput>()
            .await
            .map_err(|e| CapabilityError::Failed(format!("invalid response body: {e}")))
    }
}
