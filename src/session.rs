use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, ScreeningError};
use crate::models::{AnswerPolicy, SessionState};

/// One patient's pass through the questionnaire.
///
/// The question list is shared between sessions; the answers belong to this session alone and
/// stay index-aligned with the questions for the session's whole life.
#[derive(Debug, Clone)]
pub struct ScreeningSession {
    questions: Arc<[String]>,
    answers: Vec<String>,
    policy: AnswerPolicy,
    started: bool,
    submitted: bool,
    created_at: DateTime<Utc>,
}

impl ScreeningSession {
    pub fn new(questions: Arc<[String]>, policy: AnswerPolicy) -> Self {
        let answers = vec![String::new(); questions.len()];
        Self {
            questions,
            answers,
            policy,
            started: false,
            submitted: false,
            created_at: Utc::now(),
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(index).map(String::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: chrono::Duration) {
        self.created_at -= by;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn state(&self) -> SessionState {
        match (self.started, self.submitted) {
            (_, true) => SessionState::Submitted,
            (true, false) => SessionState::Answering,
            (false, false) => SessionState::NotStarted,
        }
    }

    pub fn start(&mut self) {
        if !self.started {
            self.started = true;
            tracing::debug!(questions = self.questions.len(), "Screening started");
        }
    }

    pub fn set_answer(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        if !self.started {
            return Err(ScreeningError::NotStarted);
        }
        if self.submitted {
            return Err(ScreeningError::AlreadySubmitted);
        }
        let len = self.answers.len();
        let slot = self
            .answers
            .get_mut(index)
            .ok_or(ScreeningError::InvalidIndex { index, len })?;
        *slot = text.into();
        Ok(())
    }

    pub fn is_answered(&self, index: usize) -> bool {
        self.answer(index).is_some_and(|a| self.policy.accepts(a))
    }

    /// 1-based numbers of the questions still lacking an answer.
    pub fn missing_answers(&self) -> Vec<usize> {
        (0..self.answers.len())
            .filter(|&i| !self.is_answered(i))
            .map(|i| i + 1)
            .collect()
    }

    /// Validates the answers and moves to `Submitted`.
    ///
    /// Resubmitting a submitted session succeeds without changing anything, so a failed
    /// generation can be retried without re-entering answers.
    pub fn submit(&mut self) -> Result<SessionState> {
        if !self.started {
            return Err(ScreeningError::NotStarted);
        }
        if self.submitted {
            return Ok(SessionState::Submitted);
        }
        let missing = self.missing_answers();
        if !missing.is_empty() {
            tracing::warn!(?missing, "Submission rejected: unanswered questions");
            return Err(ScreeningError::ValidationFailed { missing });
        }
        self.submitted = true;
        tracing::info!(answers = self.answers.len(), "Screening submitted");
        Ok(SessionState::Submitted)
    }
}
