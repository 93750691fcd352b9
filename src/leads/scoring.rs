//! LLM lead scoring.
//!
//! The scorer never fails: network errors, malformed JSON and out-of-range
//! scores all degrade to [`LeadScore::fallback`] so lead creation is never
//! blocked by the model.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::leads::model::{LeadScore, ScoreFactor};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Temperature for scoring (deterministic).
const SCORING_TEMPERATURE: f32 = 0.0;

/// Max tokens for the scoring call.
const SCORING_MAX_TOKENS: u32 = 1000;

const MIN_SCORE: f64 = 1.0;
const MAX_SCORE: f64 = 10.0;

/// Scores leads against a user-authored rubric.
#[derive(Clone)]
pub struct LeadScorer {
    llm: Arc<dyn LlmProvider>,
}

impl LeadScorer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Score a submission. Always returns a usable score.
    pub async fn score(&self, payload: &Value, rubric: &str) -> LeadScore {
        match self.try_score(payload, rubric).await {
            Ok(score) => {
                debug!(score = score.score, factors = score.breakdown.len(), "Lead scored");
                score
            }
            Err(reason) => {
                warn!(
                    model = self.llm.model_name(),
                    error = %reason,
                    "Lead scoring failed, using fallback score"
                );
                LeadScore::fallback()
            }
        }
    }

    async fn try_score(&self, payload: &Value, rubric: &str) -> Result<LeadScore, String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_scoring_system_prompt()),
            ChatMessage::user(build_scoring_user_prompt(payload, rubric)),
        ])
        .with_temperature(SCORING_TEMPERATURE)
        .with_max_tokens(SCORING_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| format!("LLM call failed: {e}"))?;

        if response.content.trim().is_empty() {
            return Err("empty response from model".into());
        }
        parse_scoring_response(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_scoring_system_prompt() -> String {
    "You are a lead scoring assistant. Analyze the lead data and score it from 1 to 10 \
     against the provided criteria.\n\n\
     Respond with ONLY a JSON object in this exact format:\n\
     {\"score\": number (1-10), \"breakdown\": [{\"factor\": \"...\", \"points\": number, \
     \"reasoning\": \"...\"}], \"summary\": \"...\"}\n\n\
     Scoring bands:\n\
     - 1-3: poor (students, competitors, irrelevant inquiries)\n\
     - 4-6: medium (some potential but missing key qualifiers)\n\
     - 7-8: good (meets most criteria, likely to convert)\n\
     - 9-10: excellent (perfect fit, high intent, decision maker)\n\n\
     Consider company size and industry, job title and authority, budget indicators, \
     urgency and intent, contact information quality, stated needs and location. \
     Points may be negative."
        .to_string()
}

fn build_scoring_user_prompt(payload: &Value, rubric: &str) -> String {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    format!(
        "Lead Data: {pretty}\n\nScoring Criteria: {rubric}\n\n\
         Please analyze this lead and provide a score with detailed breakdown."
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse and validate the model's JSON answer.
fn parse_scoring_response(raw: &str) -> Result<LeadScore, String> {
    let json_str = extract_json_object(raw);
    let value: Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| "score is missing or not a number".to_string())?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(format!("score {score} outside 1-10"));
    }

    let breakdown = match value.get("breakdown") {
        Some(Value::Array(items)) => items.iter().map(lenient_factor).collect(),
        _ => return Err("breakdown is missing or not an array".into()),
    };

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(LeadScore {
        score,
        breakdown,
        summary,
    })
}

/// Read one breakdown entry without rejecting the whole answer over its shape.
///
/// Only `score` and the breakdown being an array decide validity; entries
/// with odd field types are coerced rather than refused.
fn lenient_factor(item: &Value) -> ScoreFactor {
    let points = match item.get("points") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    ScoreFactor {
        factor: text_field(item.get("factor")),
        points,
        reasoning: text_field(item.get("reasoning")),
    }
}

/// Strings verbatim, null or missing as empty, anything else as JSON text.
fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
