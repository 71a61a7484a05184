use crate::error::{Result, ScreeningError};
use crate::models::RiskLevel;

/// Renders the screening interview into the instruction prompt sent to the model.
///
/// Pure and deterministic: the same questions and answers always give the same text.
pub fn render(questions: &[String], answers: &[String]) -> Result<String> {
    if questions.len() != answers.len() {
        return Err(ScreeningError::LengthMismatch {
            questions: questions.len(),
            answers: answers.len(),
        });
    }

    let interview_text = interview_text(questions, answers);
    let risk_levels = RiskLevel::ALL
        .iter()
        .map(RiskLevel::as_str)
        .collect::<Vec<_>>()
        .join(" / ");

    Ok(format!(
        r#"You are an AI assistant helping an Emergency Department doctor assess a patient with somatic complaints for potential mental health risks. You are a screening aid, not a diagnostic tool.

Below is a screening interview with the patient:

{interview_text}
Based on the above, please provide a summary in the following format:

**Clinical Summary:**
(A brief paragraph summarizing the patient's mental state and reported symptoms)

**Risk Flags:**
(A bulleted list of specific risk factors identified, e.g., depressive symptoms, high stress, sleep issues)

**Overall Risk Level:**
(Choose one: {risk_levels})

**Suggested Next Steps:**
(High-level recommendations for the doctor, e.g., "Refer to social worker", "Discharge with follow-up")

Note: Do NOT provide a medical diagnosis. This is a screening tool only.
"#
    ))
}

fn interview_text(questions: &[String], answers: &[String]) -> String {
    questions
        .iter()
        .zip(answers)
        .map(|(q, a)| format!("Question: {q}\nAnswer: {a}\n\n"))
        .collect()
}
