use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, ScreeningError};
use crate::prompt;
use crate::session::ScreeningSession;
use crate::summary::{SummaryClient, SummaryResult};
use crate::transport::{OllamaTransport, Transport};

/// Wires the questionnaire, prompt rendering and the summary backend together for the surfaces.
pub struct ScreeningService {
    config: Arc<Config>,
    questions: Arc<[String]>,
    summary: SummaryClient,
}

impl ScreeningService {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let transport = Arc::new(OllamaTransport::new(config.timeout())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        let questions = config.questions();
        let summary = SummaryClient::new(transport, config.timeout());
        tracing::info!(
            questions = questions.len(),
            model = %config.backend.model_id,
            endpoint = %config.backend.endpoint,
            "Screening service ready"
        );
        Self {
            config,
            questions,
            summary,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model_id(&self) -> &str {
        &self.config.backend.model_id
    }

    pub fn new_session(&self) -> ScreeningSession {
        ScreeningSession::new(
            Arc::clone(&self.questions),
            self.config.questionnaire.answer_policy,
        )
    }

    /// Runs the one generation call for a submitted session. The session itself is not touched,
    /// so a failure leaves it ready for a user-initiated retry.
    pub async fn generate(&self, session: &ScreeningSession) -> SummaryResult {
        if !session.is_submitted() {
            return Err(ScreeningError::NotSubmitted);
        }
        let prompt_text = prompt::render(session.questions(), session.answers())?;
        self.summary
            .generate(
                &prompt_text,
                &self.config.backend.model_id,
                &self.config.backend.endpoint,
            )
            .await
    }

    /// `submit()` followed by `generate()`. Validation failures never reach the backend.
    pub async fn submit_and_generate(&self, session: &mut ScreeningSession) -> SummaryResult {
        session.submit()?;
        self.generate(session).await
    }

    pub fn remediation_hint(&self, err: &ScreeningError) -> Option<String> {
        err.remediation_hint(self.model_id())
    }
}
