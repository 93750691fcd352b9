//! Lead and outbound message data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::leads::extract::ExtractedLead;
use crate::webhooks::model::Webhook;

/// Where a lead is in the sales workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    FollowedUp,
    Replied,
    MeetingBooked,
    Closed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::FollowedUp => "followed_up",
            LeadStatus::Replied => "replied",
            LeadStatus::MeetingBooked => "meeting_booked",
            LeadStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "followed_up" => Ok(LeadStatus::FollowedUp),
            "replied" => Ok(LeadStatus::Replied),
            "meeting_booked" => Ok(LeadStatus::MeetingBooked),
            "closed" => Ok(LeadStatus::Closed),
            other => Err(format!("unknown lead status '{other}'")),
        }
    }
}

/// Largest magnitude at which every whole `f64` is exactly an integer.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Whole scores go out as JSON integers (`8`, not `8.0`).
pub fn serialize_score<S: Serializer>(score: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if score.fract() == 0.0 && score.abs() <= MAX_EXACT_INT {
        serializer.serialize_i64(*score as i64)
    } else {
        serializer.serialize_f64(*score)
    }
}

/// [`serialize_score`] into a JSON value, for hand-built responses.
pub fn score_value(score: f64) -> serde_json::Value {
    serialize_score(&score, serde_json::value::Serializer).unwrap_or(serde_json::Value::Null)
}

/// One line of the score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub factor: String,
    /// Positive or negative contribution.
    #[serde(default, serialize_with = "serialize_score")]
    pub points: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Score plus the model's explanation of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    /// 1 to 10 inclusive.
    #[serde(serialize_with = "serialize_score")]
    pub score: f64,
    pub breakdown: Vec<ScoreFactor>,
    pub summary: String,
}

impl LeadScore {
    /// Substitute used whenever the scoring call or its validation fails.
    pub fn fallback() -> Self {
        Self {
            score: 5.0,
            breakdown: vec![ScoreFactor {
                factor: "AI Scoring Failed".into(),
                points: 0.0,
                reasoning: "Unable to process lead with AI, assigned default score".into(),
            }],
            summary: "Lead scoring failed, manual review required".into(),
        }
    }
}

/// A prospective customer captured from a form submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub user_id: String,
    pub webhook_id: String,
    pub webhook_name: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// The submission exactly as received.
    pub raw_data: serde_json::Value,
    #[serde(serialize_with = "serialize_score")]
    pub score: f64,
    pub score_breakdown: LeadScore,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(
        webhook: &Webhook,
        fields: ExtractedLead,
        raw_data: serde_json::Value,
        score: LeadScore,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: webhook.user_id.clone(),
            webhook_id: webhook.id.clone(),
            webhook_name: webhook.name.clone(),
            name: fields.name,
            email: fields.email,
            phone: fields.phone,
            company: fields.company,
            raw_data,
            score: score.score,
            score_breakdown: score,
            status: LeadStatus::New,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Delivery state of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status '{other}'")),
        }
    }
}

/// A follow-up message queued by an agent for a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub lead_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub subject: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Body of `PATCH /api/leads/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadStatusUpdate {
    pub status: LeadStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_scores_serialize_as_integers() {
        let mut score = LeadScore::fallback();
        score.score = 8.0;
        let json = serde_json::to_value(&score).unwrap();
        assert!(json["score"].is_i64());
        assert_eq!(json["score"], serde_json::json!(8));
        assert!(json["breakdown"][0]["points"].is_i64());

        score.score = 7.5;
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["score"], serde_json::json!(7.5));

        let back: LeadScore = serde_json::from_value(json).unwrap();
        assert_eq!(back.score, 7.5);
    }

    #[test]
    fn fallback_score_is_exact() {
        let fallback = LeadScore::fallback();
        let json = serde_json::to_value(&fallback).unwrap();
        assert_eq!(json["score"], 5.0);
        assert_eq!(json["breakdown"].as_array().unwrap().len(), 1);
        assert_eq!(json["breakdown"][0]["factor"], "AI Scoring Failed");
        assert_eq!(json["breakdown"][0]["points"], 0.0);
        assert_eq!(json["summary"], "Lead scoring failed, manual review required");
    }

    #[test]
    fn lead_status_strings() {
        let all = [
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::FollowedUp,
            LeadStatus::Replied,
            LeadStatus::MeetingBooked,
            LeadStatus::Closed,
        ];
        for status in all {
            assert_eq!(status.as_str().parse::<LeadStatus>().unwrap(), status);
        }
        assert_eq!(LeadStatus::default(), LeadStatus::New);
        assert!("lost".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn score_factor_defaults_missing_fields() {
        let factor: ScoreFactor = serde_json::from_str(r#"{"factor": "Budget"}"#).unwrap();
        assert_eq!(factor.points, 0.0);
        assert_eq!(factor.reasoning, "");
    }
}
