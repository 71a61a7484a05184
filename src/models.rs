use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall risk levels the model is asked to choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    None,
    MildConcern,
    NeedsUrgentFormalAssessment,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [
        RiskLevel::None,
        RiskLevel::MildConcern,
        RiskLevel::NeedsUrgentFormalAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "None",
            RiskLevel::MildConcern => "Mild Concern",
            RiskLevel::NeedsUrgentFormalAssessment => "Needs Urgent Formal Assessment",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Answering,
    Submitted,
}

/// What counts as an answer when the form is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPolicy {
    /// Any non-empty string, whitespace included.
    NonEmpty,
    /// Non-empty after trimming whitespace.
    #[default]
    NonBlank,
}

impl AnswerPolicy {
    pub fn accepts(&self, answer: &str) -> bool {
        match self {
            AnswerPolicy::NonEmpty => !answer.is_empty(),
            AnswerPolicy::NonBlank => !answer.trim().is_empty(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "non_empty" | "non-empty" => Some(AnswerPolicy::NonEmpty),
            "non_blank" | "non-blank" => Some(AnswerPolicy::NonBlank),
            _ => None,
        }
    }
}

/// A generated summary, exactly as the model returned it.
#[derive(Debug, Clone)]
pub struct Summary {
    pub text: String,
    pub model: String,
    pub elapsed: Duration,
    pub generated_at: DateTime<Utc>,
}

/// Request body for Ollama's `/api/generate`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub done: bool,
}

/// Error body Ollama sends with non-success statuses.
#[derive(Debug, Deserialize)]
pub struct BackendErrorBody {
    pub error: String,
}
