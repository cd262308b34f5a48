use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality analysis of a prompt as reported by the model. Only constructed
/// through [`PromptAnalysis::from_response`], which validates shape and score
/// ranges; never persisted by the core.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptAnalysis {
    pub structure_score: u8,
    pub clarity_score: u8,
    pub completeness_score: u8,
    pub suggestions: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("no JSON object found in model output")]
    NoJsonFound,
    #[error("model output is not valid JSON: {0}")]
    InvalidFormat(String),
    #[error("analysis JSON violates the expected schema: {0}")]
    SchemaViolation(String),
}

const SCORE_RANGE: std::ops::RangeInclusive<u8> = 1..=100;

impl PromptAnalysis {
    /// Parse a raw model response into a validated analysis.
    ///
    /// Models routinely ignore "return only JSON" instructions, so the
    /// payload is first isolated with [`extract_json_object`] before parsing.
    pub fn from_response(raw: &str) -> Result<Self, AnalysisError> {
        let payload = extract_json_object(raw).ok_or(AnalysisError::NoJsonFound)?;
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| AnalysisError::InvalidFormat(e.to_string()))?;
        let analysis: PromptAnalysis = serde_json::from_value(value)
            .map_err(|e| AnalysisError::SchemaViolation(e.to_string()))?;
        analysis.check_scores()?;
        Ok(analysis)
    }

    fn check_scores(&self) -> Result<(), AnalysisError> {
        for (field, score) in [
            ("structure_score", self.structure_score),
            ("clarity_score", self.clarity_score),
            ("completeness_score", self.completeness_score),
        ] {
            if !SCORE_RANGE.contains(&score) {
                return Err(AnalysisError::SchemaViolation(format!(
                    "{field} must be within 1..=100, got {score}"
                )));
            }
        }
        Ok(())
    }
}

/// Isolate a JSON object embedded in unstructured text: the substring from
/// the first `{` to the last `}`, inclusive. Returns `None` when no `{`
/// exists. When no closing `}` follows, the rest of the text is returned and
/// left for the JSON parser to reject.
///
/// This is positional, not a balanced-brace parse: prose containing its own
/// `{...}` before or after the real object widens the slice and the parse
/// fails downstream.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = match text.rfind('}') {
        Some(e) if e >= start => e + 1,
        _ => text.len(),
    };
    Some(&text[start..end])
}
