use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::instrument;

use crate::error::{Result, ScreeningError};
use crate::models::{GenerateRequest, Summary};
use crate::transport::Transport;

pub type SummaryResult = Result<Summary>;

/// Sends a rendered prompt to the generation backend and hands back the text untouched.
///
/// The model's output is not checked against the four requested sections; whatever comes back
/// is what the clinician sees.
pub struct SummaryClient {
    tx: Arc<dyn Transport>,
    timeout: Duration,
}

impl SummaryClient {
    pub fn new(tx: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    #[instrument(skip(self, prompt_text), fields(prompt_len = prompt_text.len()))]
    pub async fn generate(
        &self,
        prompt_text: &str,
        model_id: &str,
        endpoint: &str,
    ) -> SummaryResult {
        let request = GenerateRequest {
            model: model_id.to_string(),
            prompt: prompt_text.to_string(),
            stream: false,
        };

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.timeout, self.tx.generate(endpoint, &request)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(response)) => {
                if !response.done {
                    tracing::warn!("Backend marked the generation as unfinished; showing it as is");
                }
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    chars = response.response.len(),
                    "Summary generated"
                );
                Ok(Summary {
                    text: response.response,
                    model: response.model.unwrap_or_else(|| model_id.to_string()),
                    elapsed,
                    generated_at: Utc::now(),
                })
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Summary generation failed");
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "Summary generation timed out"
                );
                Err(ScreeningError::BackendTimeout(self.timeout))
            }
        }
    }
}
