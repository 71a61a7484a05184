use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::{Result, ScreeningError};
use crate::models::{BackendErrorBody, GenerateRequest, GenerateResponse};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn generate(&self, endpoint: &str, req: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Talks to a local Ollama server over its native `/api/generate` route. One attempt per call.
pub struct OllamaTransport {
    client: Client,
    timeout: Duration,
}

impl OllamaTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScreeningError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, err: reqwest::Error) -> ScreeningError {
        if err.is_timeout() {
            ScreeningError::BackendTimeout(self.timeout)
        } else if err.is_connect() || err.is_request() || err.is_builder() {
            ScreeningError::BackendUnavailable(err.to_string())
        } else {
            ScreeningError::BackendError(err.to_string())
        }
    }
}

/// Strips trailing slashes and an OpenAI-style `/v1` suffix from the configured endpoint.
pub fn generate_url(endpoint: &str) -> String {
    let mut base = endpoint.trim_end_matches('/');
    if let Some(stripped) = base.strip_suffix("/v1") {
        base = stripped;
    }
    format!("{base}/api/generate")
}

#[async_trait]
impl Transport for OllamaTransport {
    async fn generate(&self, endpoint: &str, req: &GenerateRequest) -> Result<GenerateResponse> {
        let url = generate_url(endpoint);
        tracing::debug!(%url, model = %req.model, "Sending generation request");

        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScreeningError::BackendError(describe_failure(status, &body)));
        }

        response.json::<GenerateResponse>().await.map_err(|e| {
            if e.is_timeout() {
                ScreeningError::BackendTimeout(self.timeout)
            } else {
                ScreeningError::BackendError(format!("Failed to parse Ollama response: {e}"))
            }
        })
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<BackendErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());
    if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    }
}
