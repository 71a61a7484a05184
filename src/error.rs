use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScreeningError>;

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("answer index {index} is out of range (questionnaire has {len} questions)")]
    InvalidIndex { index: usize, len: usize },

    #[error("screening has not been started")]
    NotStarted,

    #[error("screening has already been submitted")]
    AlreadySubmitted,

    #[error("screening has not been submitted yet")]
    NotSubmitted,

    #[error("{questions} questions but {answers} answers")]
    LengthMismatch { questions: usize, answers: usize },

    /// `missing` holds 1-based question numbers.
    #[error("unanswered questions: {}", format_numbers(.missing))]
    ValidationFailed { missing: Vec<usize> },

    #[error("generation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("generation backend did not respond within {0:?}")]
    BackendTimeout(Duration),

    #[error("generation backend error: {0}")]
    BackendError(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScreeningError {
    /// Failures of the generation call. The session is left as it was so the user can retry.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::BackendTimeout(_) | Self::BackendError(_)
        )
    }

    pub fn remediation_hint(&self, model_id: &str) -> Option<String> {
        if self.is_backend_failure() {
            Some(format!(
                "Please make sure Ollama is running and the model '{model_id}' is pulled."
            ))
        } else {
            None
        }
    }
}

fn format_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
